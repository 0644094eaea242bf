//! Ranking and reporting
//!
//! Turns the raw counts of a [`CounterStore`] into a bounded, ordered list of
//! findings per category and renders them as text. Sections are written one
//! at a time so that a failure part-way still leaves the earlier sections on
//! the output.

use std::io::Write;

use crate::error::AnalysisResult;
use crate::shape::signature_to_display_string;
use crate::store::{Category, CounterStore, ShapeEntry, StoreNode};
use crate::value::{display_location, HostResolver, Site};

const RULE: &str = "----------------------------";

const INCONTIGUOUS_NOTE: &str = "Why: In order to handle large and sparse arrays, there are two types of array storage internally:\n\
\t * Fast Elements: linear storage for compact key sets\n\
\t * Dictionary Elements: hash table storage otherwise\n\
It's best not to cause the array storage to flip from one type to another.";

/// A site seen with more than one shape
#[derive(Debug, Clone)]
pub struct PolymorphicFinding {
    pub site: Site,
    pub weight: f64,
    pub shapes: Vec<ShapeEntry>,
}

/// A site with a plain occurrence count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountFinding {
    pub site: Site,
    pub count: u64,
}

/// Top findings of one category, plus how many sites qualified in total
#[derive(Debug, Clone)]
pub struct Section<T> {
    pub category: Category,
    pub findings: Vec<T>,
    pub total: usize,
}

/// Severity of a polymorphic site.
///
/// The second most frequent shape's count is the integer part; the most
/// frequent count, divided by ten until it drops below one, is the fraction.
pub fn severity_weight(counts: &[u64]) -> f64 {
    let mut most = 0;
    let mut second = 0;
    for &count in counts {
        if most < count {
            second = most;
            most = count;
        } else if second < count {
            second = count;
        }
    }

    let mut reduced = most as f64;
    while reduced >= 1.0 {
        reduced /= 10.0;
    }
    second as f64 + reduced
}

fn parse_site(key: &str) -> Option<Site> {
    match key.parse::<u32>() {
        Ok(id) => Some(Site(id)),
        Err(_) => {
            log::warn!("Skipping store entry with non-numeric site key {:?}", key);
            None
        }
    }
}

pub fn rank_polymorphic(store: &CounterStore, limit: usize) -> AnalysisResult<Section<PolymorphicFinding>> {
    let mut findings = Vec::new();
    if let Some(sites) = store.category(Category::PolymorphicStatement)? {
        for (key, node) in sites {
            let shapes = match node {
                StoreNode::Shapes(shapes) if shapes.len() > 1 => shapes,
                _ => continue,
            };
            let Some(site) = parse_site(key) else { continue };
            let counts: Vec<u64> = shapes.iter().map(|s| s.count).collect();
            findings.push(PolymorphicFinding {
                site,
                weight: severity_weight(&counts),
                shapes: shapes.clone(),
            });
        }
    }

    findings.sort_by_key(|f| f.site);
    findings.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    let total = findings.len();
    findings.truncate(limit);

    Ok(Section {
        category: Category::PolymorphicStatement,
        findings,
        total,
    })
}

pub fn rank_counts(store: &CounterStore, category: Category, limit: usize) -> AnalysisResult<Section<CountFinding>> {
    let mut findings = Vec::new();
    if let Some(sites) = store.category(category)? {
        for (key, node) in sites {
            let StoreNode::Count(tally) = node else { continue };
            let Some(site) = parse_site(key) else { continue };
            findings.push(CountFinding { site, count: tally.count });
        }
    }

    findings.sort_by_key(|f| f.site);
    findings.sort_by(|a, b| b.count.cmp(&a.count));
    let total = findings.len();
    findings.truncate(limit);

    Ok(Section { category, findings, total })
}

fn title(category: Category) -> &'static str {
    match category {
        Category::PolymorphicStatement => "Report of polymorphic statements:",
        Category::UninitArrayElem => "Report of loading undeclared or deleted array elements:",
        Category::ArrayTypeSwitch => "Report of switching array type:",
        Category::IncontiguousArray => "Report of making incontiguous array:",
        Category::InitObjNonConstructor => "Report of initialize object field in non-constructor:",
    }
}

fn total_label(category: Category) -> &'static str {
    match category {
        Category::PolymorphicStatement => "Number of polymorphic statements spotted",
        Category::UninitArrayElem => "Number of loading undeclared or deleted array elements spotted",
        Category::ArrayTypeSwitch => "Number of switching array type spotted",
        Category::IncontiguousArray => "Number of putting incontiguous array statements",
        Category::InitObjNonConstructor => "Number of statements init objects in non-constructor",
    }
}

/// Renders report sections to a text sink
pub struct ReportWriter<'a> {
    resolver: &'a dyn HostResolver,
    out: &'a mut dyn Write,
}

impl<'a> ReportWriter<'a> {
    pub fn new(resolver: &'a dyn HostResolver, out: &'a mut dyn Write) -> Self {
        Self { resolver, out }
    }

    pub fn write_polymorphic(&mut self, section: &Section<PolymorphicFinding>) -> AnalysisResult<()> {
        writeln!(self.out, "{}", RULE)?;
        writeln!(self.out, "{}", title(section.category))?;
        for finding in &section.findings {
            writeln!(self.out, "------")?;
            writeln!(
                self.out,
                "[Location: {}] <- No. layouts: {}",
                display_location(self.resolver, finding.site),
                finding.shapes.len()
            )?;
            for shape in &finding.shapes {
                writeln!(
                    self.out,
                    "count: {} -> layout[{}]: {}",
                    shape.count,
                    finding.site,
                    signature_to_display_string(&shape.sig, self.resolver)
                )?;
            }
        }
        writeln!(self.out, "...")?;
        writeln!(self.out, "{}: {}", total_label(section.category), section.total)?;
        Ok(())
    }

    pub fn write_counts(&mut self, section: &Section<CountFinding>) -> AnalysisResult<()> {
        writeln!(self.out, "{}", RULE)?;
        writeln!(self.out, "{}", title(section.category))?;
        for finding in &section.findings {
            writeln!(
                self.out,
                "[Location: {}] <- No. usages: {}",
                display_location(self.resolver, finding.site),
                finding.count
            )?;
        }
        writeln!(self.out, "...")?;
        writeln!(self.out, "{}: {}", total_label(section.category), section.total)?;
        if section.category == Category::IncontiguousArray {
            writeln!(self.out, "{}", INCONTIGUOUS_NOTE)?;
        }
        Ok(())
    }
}

/// Rank and print every category in report order, section by section
pub fn write_report(
    store: &CounterStore,
    limit: usize,
    resolver: &dyn HostResolver,
    out: &mut dyn Write,
) -> AnalysisResult<()> {
    let mut writer = ReportWriter::new(resolver, out);
    writer.write_polymorphic(&rank_polymorphic(store, limit)?)?;
    for &category in &Category::ALL[1..] {
        writer.write_counts(&rank_counts(store, category, limit)?)?;
    }
    writeln!(writer.out, "{}", RULE)?;
    Ok(())
}
