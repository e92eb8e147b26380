//! Namespace label syntax: dot-separated labels, canonicalized and
//! length-checked per the wire-level external interface.

use std::fmt;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_FINGERPRINT_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    Empty,
    TooLong { label: String, len: usize },
    FingerprintTooLong { total: usize },
}

impl fmt::Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelError::Empty => write!(f, "label must not be empty"),
            LabelError::TooLong { label, len } => {
                write!(f, "label {label:?} is {len} characters, exceeds the {MAX_LABEL_LEN} limit")
            }
            LabelError::FingerprintTooLong { total } => write!(
                f,
                "fingerprint total length {total} exceeds the {MAX_FINGERPRINT_LEN} limit"
            ),
        }
    }
}

impl std::error::Error for LabelError {}

impl Label {
    /// Canonicalize and validate a single label: lower-case, with spaces
    /// and hyphens replaced by underscores, 1–63 characters.
    pub fn parse(raw: &str) -> Result<Label, LabelError> {
        if raw.is_empty() {
            return Err(LabelError::Empty);
        }
        let canonical: String = raw
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        if canonical.is_empty() {
            return Err(LabelError::Empty);
        }
        if canonical.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong {
                label: canonical,
                len: canonical.len(),
            });
        }
        Ok(Label(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A full dotted label sequence identifying a service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(Vec<Label>);

impl Fingerprint {
    /// Parse a dot-separated string such as `"svc.payments.charge"` into a
    /// validated, canonicalized fingerprint.
    pub fn parse(dotted: &str) -> Result<Fingerprint, LabelError> {
        let labels = dotted
            .split('.')
            .map(Label::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Fingerprint::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<Label>) -> Result<Fingerprint, LabelError> {
        let total: usize = labels.iter().map(|l| l.as_str().len()).sum::<usize>()
            + labels.len().saturating_sub(1); // dot separators
        if total > MAX_FINGERPRINT_LEN {
            return Err(LabelError::FingerprintTooLong { total });
        }
        Ok(Fingerprint(labels))
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }

    /// True if `self`'s labels start with every label in `prefix`, in order.
    pub fn starts_with(&self, prefix: &[Label]) -> bool {
        if prefix.len() > self.0.len() {
            return false;
        }
        self.0.iter().zip(prefix.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(Label::as_str)
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{rendered}")
    }
}
