//! Pulls rows for a list of article names out of finished daily artifacts.
//! Read-only: never touches pipeline state.

use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::artifact::{self, ArtifactRow};
use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct KeywordQuery {
    articles: HashSet<String>,
    domains: Option<BTreeSet<String>>,
}

impl KeywordQuery {
    pub fn new<I, S>(articles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            articles: articles.into_iter().map(Into::into).collect(),
            domains: None,
        }
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, row: &ArtifactRow) -> bool {
        self.articles.contains(&row.article)
            && self
                .domains
                .as_ref()
                .map_or(true, |domains| domains.contains(&row.domain))
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// Newline-delimited article names; blank lines are skipped.
pub fn load_keywords(path: &Path) -> Result<Vec<String>, Error> {
    let text = fs::read_to_string(path)?;
    let keywords: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    info!("Loaded {} keywords from {}", keywords.len(), path.display());
    Ok(keywords)
}

/// Matching rows from every artifact, in artifact order.
pub fn extract(query: &KeywordQuery, artifacts: &[PathBuf]) -> Result<Vec<ArtifactRow>, Error> {
    let per_artifact: Vec<Vec<ArtifactRow>> = artifacts
        .par_iter()
        .map(|path| {
            let mut matched = Vec::new();
            artifact::for_each_row(path, |row| {
                if query.matches(&row) {
                    matched.push(row);
                }
                Ok(())
            })?;
            debug!("{} matching rows in {}", matched.len(), path.display());
            Ok(matched)
        })
        .collect::<Result<_, Error>>()?;

    Ok(per_artifact.into_iter().flatten().collect())
}

pub fn write_rows<W: Write>(rows: &[ArtifactRow], out: W) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{DailyTable, DayReport};
    use crate::artifact::ArtifactStore;
    use crate::records::DecodeStats;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn write_day(store: &ArtifactStore, d: u32, rows: &[(&str, &str, u64)]) -> PathBuf {
        let mut table = DailyTable::new(NaiveDate::from_ymd_opt(2015, 1, d).unwrap());
        for (domain, article, views) in rows {
            table.add(domain, article, *views);
        }
        let report = DayReport {
            date: table.date().format("%Y%m%d").to_string(),
            expected_hours: 24,
            merged_hours: 24,
            missing_hours: vec![],
            excluded: vec![],
            decode: DecodeStats::default(),
            rows: table.len(),
            total_views: table.total_views(),
        };
        store.write(&table, &report).unwrap()
    }

    #[test]
    fn test_extract_matches_articles_across_days() {
        let tmp = tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let day1 = write_day(&store, 1, &[("en", "Cat", 12), ("en", "Dog", 3), ("de", "Cat", 1)]);
        let day2 = write_day(&store, 2, &[("en", "Cat", 4), ("fr", "Chat", 9)]);

        let rows = extract(&KeywordQuery::new(["Cat", "Chat"]), &[day1.clone(), day2.clone()]).unwrap();
        let summary: Vec<_> = rows
            .iter()
            .map(|r| format!("{}/{}/{}/{}", r.date, r.domain, r.article, r.view_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                "20150101/de/Cat/1",
                "20150101/en/Cat/12",
                "20150102/en/Cat/4",
                "20150102/fr/Chat/9",
            ]
        );

        let en_only = KeywordQuery::new(["Cat"]).with_domains(["en"]);
        assert_eq!(extract(&en_only, &[day1, day2]).unwrap().len(), 2);
    }

    #[test]
    fn test_load_keywords_skips_blank_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("keywords.txt");
        fs::write(&path, "Cat\n\n  Dog \n").unwrap();
        assert_eq!(load_keywords(&path).unwrap(), vec!["Cat", "Dog"]);
    }

    #[test]
    fn test_write_rows_has_header() {
        let rows = vec![ArtifactRow {
            domain: "en".to_string(),
            article: "Cat".to_string(),
            view_count: 12,
            date: "20150101".to_string(),
        }];
        let mut out = Vec::new();
        write_rows(&rows, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "domain,article,view_count,date\nen,Cat,12,20150101\n"
        );
    }
}
