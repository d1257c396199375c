// Structural verification of a transcoded file
//
// - Fuzzy: tolerant values (durations, bitrates, frame rates)
// - Report: ffprobe documents as typed reports with attribute tables
// - diff: format comparison plus greedy same-kind stream pairing

pub mod fuzzy;
pub mod report;

use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub use fuzzy::{parse_frame_rate, AttributeValue, FuzzyDuration, FuzzyInt};
pub use report::{ProbeReport, StreamKind, StreamReport};

use crate::config::VerifyConfig;
use crate::error::{ChunkcodeError, Result};

pub const REASON_DIFFERENT_VALUES: &str = "Different attribute values";
pub const REASON_NO_MATCHING_STREAM: &str = "No matching stream";

const FORMAT_LOCATION: &str = "format";

/// One difference between two reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiffRecord {
    Attribute {
        location: String,
        attribute: String,
        original_value: AttributeValue,
        modified_value: AttributeValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_stream_index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        modified_stream_index: Option<usize>,
        reason: String,
    },
    UnmatchedStream {
        location: String,
        original_stream_index: Option<usize>,
        modified_stream_index: Option<usize>,
        reason: String,
    },
}

impl DiffRecord {
    pub fn location(&self) -> &str {
        match self {
            DiffRecord::Attribute { location, .. } | DiffRecord::UnmatchedStream { location, .. } => location,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            DiffRecord::Attribute { reason, .. } | DiffRecord::UnmatchedStream { reason, .. } => reason,
        }
    }
}

/// Adjustments applied to a comparison.
///
/// Overrides replace the modified side's value, so an intentional change
/// (a new codec, a new resolution) is compared against what was requested
/// instead of being reported.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub format_overrides: HashMap<String, AttributeValue>,
    pub stream_overrides: HashMap<StreamKind, HashMap<String, AttributeValue>>,
    pub format_exclude: HashSet<String>,
    pub stream_exclude: HashMap<StreamKind, HashSet<String>>,
    pub treat_missing_as_unchanged: bool,
}

impl DiffOptions {
    /// Exclusions and missing-attribute handling from the `[verify]` section.
    /// Keys are `format` or a stream kind.
    pub fn from_config(config: &VerifyConfig) -> Result<Self> {
        let mut options = DiffOptions {
            treat_missing_as_unchanged: config.treat_missing_as_unchanged,
            ..Default::default()
        };

        for (location, attributes) in &config.exclude {
            let attributes = attributes.iter().cloned();
            if location == FORMAT_LOCATION {
                options.format_exclude.extend(attributes);
                continue;
            }
            let kind = StreamKind::from_codec_type(location).map_err(|_| {
                ChunkcodeError::Config(format!("Unknown location in verify.exclude: {}", location))
            })?;
            options.stream_exclude.entry(kind).or_default().extend(attributes);
        }

        Ok(options)
    }

    pub fn with_stream_override(mut self, kind: StreamKind, attribute: &str, value: AttributeValue) -> Self {
        self.stream_overrides
            .entry(kind)
            .or_default()
            .insert(attribute.to_string(), value);
        self
    }

    pub fn with_format_override(mut self, attribute: &str, value: AttributeValue) -> Self {
        self.format_overrides.insert(attribute.to_string(), value);
        self
    }
}

struct Comparison<'a> {
    location: &'a str,
    overrides: Option<&'a HashMap<String, AttributeValue>>,
    exclude: Option<&'a HashSet<String>>,
    treat_missing_as_unchanged: bool,
    original_stream_index: Option<usize>,
    modified_stream_index: Option<usize>,
}

impl Comparison<'_> {
    fn compare(
        &self,
        original: Vec<(&'static str, AttributeValue)>,
        modified: Vec<(&'static str, AttributeValue)>,
    ) -> Vec<DiffRecord> {
        let mut records = Vec::new();

        for ((name, original_value), (_, modified_value)) in original.into_iter().zip(modified) {
            if self.exclude.is_some_and(|e| e.contains(name)) {
                continue;
            }
            let modified_value = self
                .overrides
                .and_then(|o| o.get(name))
                .cloned()
                .unwrap_or(modified_value);

            if self.treat_missing_as_unchanged && (original_value.is_missing() || modified_value.is_missing()) {
                continue;
            }

            if original_value != modified_value {
                records.push(DiffRecord::Attribute {
                    location: self.location.to_string(),
                    attribute: name.to_string(),
                    original_value,
                    modified_value,
                    original_stream_index: self.original_stream_index,
                    modified_stream_index: self.modified_stream_index,
                    reason: REASON_DIFFERENT_VALUES.to_string(),
                });
            }
        }

        records
    }
}

/// Differences between `original` and `modified`; empty means equivalent.
///
/// Streams are paired per kind. Each original stream, in file order, takes
/// the unmatched modified stream with the fewest differences; the first
/// candidate with none ends the search. Stream indices in the records count
/// within the stream's kind.
pub fn diff(original: &ProbeReport, modified: &ProbeReport, options: &DiffOptions) -> Vec<DiffRecord> {
    let format = Comparison {
        location: FORMAT_LOCATION,
        overrides: Some(&options.format_overrides),
        exclude: Some(&options.format_exclude),
        treat_missing_as_unchanged: options.treat_missing_as_unchanged,
        original_stream_index: None,
        modified_stream_index: None,
    };
    let mut records = format.compare(original.format_attributes(), modified.format_attributes());

    for kind in StreamKind::ALL {
        records.extend(diff_streams(
            kind,
            &original.streams_of(kind),
            &modified.streams_of(kind),
            options,
        ));
    }

    records
}

fn diff_streams(
    kind: StreamKind,
    originals: &[&StreamReport],
    modifieds: &[&StreamReport],
    options: &DiffOptions,
) -> Vec<DiffRecord> {
    let mut records = Vec::new();
    let mut unmatched: Vec<usize> = (0..modifieds.len()).collect();

    for (original_index, original) in originals.iter().enumerate() {
        let mut best: Option<(usize, Vec<DiffRecord>)> = None;

        for (position, &modified_index) in unmatched.iter().enumerate() {
            let comparison = Comparison {
                location: kind.as_str(),
                overrides: options.stream_overrides.get(&kind),
                exclude: options.stream_exclude.get(&kind),
                treat_missing_as_unchanged: options.treat_missing_as_unchanged,
                original_stream_index: Some(original_index),
                modified_stream_index: Some(modified_index),
            };
            let differences =
                comparison.compare(original.attributes(), modifieds[modified_index].attributes());

            let better = best.as_ref().is_none_or(|(_, current)| differences.len() < current.len());
            if better {
                let perfect = differences.is_empty();
                best = Some((position, differences));
                if perfect {
                    break;
                }
            }
        }

        match best {
            Some((position, differences)) => {
                unmatched.remove(position);
                records.extend(differences);
            }
            None => records.push(DiffRecord::UnmatchedStream {
                location: kind.as_str().to_string(),
                original_stream_index: Some(original_index),
                modified_stream_index: None,
                reason: REASON_NO_MATCHING_STREAM.to_string(),
            }),
        }
    }

    records.extend(unmatched.into_iter().map(|modified_index| DiffRecord::UnmatchedStream {
        location: kind.as_str().to_string(),
        original_stream_index: None,
        modified_stream_index: Some(modified_index),
        reason: REASON_NO_MATCHING_STREAM.to_string(),
    }));

    records
}

impl PartialEq for ProbeReport {
    fn eq(&self, other: &Self) -> bool {
        diff(self, other, &DiffOptions::default()).is_empty()
    }
}
