use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

/// One decoded row of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub domain: String,
    pub article: String,
    pub view_count: u64,
}

/// Per-file decode counters. Dropped rows are expected noise, not errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub lines: u64,
    pub kept: u64,
    /// Too few fields, empty domain/article, an unparsable count, or bytes
    /// that are not UTF-8.
    pub malformed: u64,
    /// Well-formed rows whose domain is outside the keep-set.
    pub filtered: u64,
}

impl DecodeStats {
    pub fn absorb(&mut self, other: &DecodeStats) {
        self.lines += other.lines;
        self.kept += other.kept;
        self.malformed += other.malformed;
        self.filtered += other.filtered;
    }
}

/// Decodes gzip snapshot files into records whose domain is in the keep-set.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    keep_domains: Arc<BTreeSet<String>>,
}

impl RecordFilter {
    pub fn new(keep_domains: BTreeSet<String>) -> Self {
        Self {
            keep_domains: Arc::new(keep_domains),
        }
    }

    pub fn keeps(&self, domain: &str) -> bool {
        self.keep_domains.contains(domain)
    }

    /// A fresh pass over the file; opening it again restarts the sequence.
    pub fn open(&self, path: &Path) -> io::Result<RecordReader<BufReader<MultiGzDecoder<File>>>> {
        let file = File::open(path)?;
        Ok(self.read(MultiGzDecoder::new(file)))
    }

    /// Filters an already-decompressed line stream.
    pub fn read<R: Read>(&self, source: R) -> RecordReader<BufReader<R>> {
        RecordReader {
            reader: BufReader::new(source),
            filter: self.clone(),
            buffer: Vec::new(),
            stats: DecodeStats::default(),
        }
    }
}

/// Lazy record stream. Yields `Err` once if the underlying read fails
/// (e.g. a truncated gzip member) and then ends.
pub struct RecordReader<R> {
    reader: R,
    filter: RecordFilter,
    buffer: Vec<u8>,
    stats: DecodeStats,
}

impl<R> RecordReader<R> {
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.stats.lines += 1;

            let Some(record) = std::str::from_utf8(&self.buffer).ok().and_then(decode_line) else {
                self.stats.malformed += 1;
                continue;
            };
            if !self.filter.keeps(&record.domain) {
                self.stats.filtered += 1;
                continue;
            }
            self.stats.kept += 1;
            return Some(Ok(record));
        }
    }
}

/// `domain article view_count [bytes]`, split on single spaces with no quote
/// handling: the article is the second token verbatim, quotes included.
pub fn decode_line(line: &str) -> Option<Record> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut fields = line.split(' ');
    let domain = fields.next()?;
    let article = fields.next()?;
    let count = fields.next()?;
    if domain.is_empty() || article.is_empty() {
        return None;
    }
    let view_count = count.parse::<u64>().ok()?;
    Some(Record {
        domain: domain.to_string(),
        article: article.to_string(),
        view_count,
    })
}
