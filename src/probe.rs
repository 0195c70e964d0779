use std::path::Path;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::process::Command;

use crate::error::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    General,
    Video,
    Audio,
    Text,
    Other,
}

impl TrackKind {
    pub fn from_type_tag(tag: &str) -> Self {
        match tag {
            "General" => Self::General,
            "Video" => Self::Video,
            "Audio" => Self::Audio,
            "Text" | "Subtitle" => Self::Text,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Lists collapse to their first element. `None` for empty lists and blank strings.
    pub fn scalar(&self) -> Option<&AttrValue> {
        match self {
            Self::List(items) => items.first().and_then(|item| item.scalar()),
            Self::Text(text) if text.trim().is_empty() => None,
            other => Some(other),
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.scalar()? {
            Self::Text(text) => Some(text.clone()),
            Self::Number(number) => Some(format_number(*number)),
            Self::List(_) => None,
        }
    }

    /// Numeric value of the attribute. Strings drop every character except digits and dots
    /// first, so `"1 920 pixels"` reads as `1920` and `"23.976 FPS"` as `23.976`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.scalar()? {
            Self::Number(number) => Some(*number),
            Self::Text(text) => {
                let digits: String = text
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                match digits.parse() {
                    Ok(number) => Some(number),
                    Err(err) => {
                        log::debug!("Could not convert {:?} to a number: {}", text, err);
                        None
                    }
                }
            }
            Self::List(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|number| number.trunc() as i64)
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub kind: TrackKind,
    pub attributes: HashMap<String, AttrValue>,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            attributes: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.insert(name.to_owned(), value);
        self
    }

    pub fn with_text(self, name: &str, value: &str) -> Self {
        self.with(name, AttrValue::Text(value.to_owned()))
    }

    pub fn with_number(self, name: &str, value: f64) -> Self {
        self.with(name, AttrValue::Number(value))
    }

    /// The attribute under `name`, skipping empty values.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        let value = self.attributes.get(name)?;
        value.scalar()?;
        Some(value)
    }

    /// The first attribute from `candidates` that is present, in the order given.
    pub fn first_attr(&self, candidates: &[&str]) -> Option<&AttrValue> {
        candidates.iter().find_map(|name| self.attr(name))
    }

    pub fn first_string(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find_map(|name| self.attr(name).and_then(|value| value.as_string()))
    }

    pub fn first_i64(&self, candidates: &[&str]) -> Option<i64> {
        candidates
            .iter()
            .find_map(|name| self.attr(name).and_then(|value| value.as_i64()))
    }

    pub fn first_f64(&self, candidates: &[&str]) -> Option<f64> {
        candidates
            .iter()
            .find_map(|name| self.attr(name).and_then(|value| value.as_f64()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub tracks: Vec<Track>,
}

impl ProbeReport {
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |track| track.kind == kind)
    }

    pub fn first_of(&self, kind: TrackKind) -> Option<&Track> {
        self.tracks_of(kind).next()
    }
}

/// Inspects a media file and reports its tracks.
///
/// Dropping the returned future must abandon the inspection, child processes included.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError>;
}

/// Runs the `mediainfo` command line tool with JSON output.
#[derive(Debug, Clone)]
pub struct MediaInfoCli {
    program: String,
}

impl Default for MediaInfoCli {
    fn default() -> Self {
        Self::new("mediainfo")
    }
}

impl MediaInfoCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        let output = Command::new(&self.program)
            .arg("--Version")
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) => output.status.success(),
            Err(err) => {
                log::debug!("{} cannot be run: {}", self.program, err);
                false
            }
        }
    }
}

#[async_trait]
impl Probe for MediaInfoCli {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let output = Command::new(&self.program)
            .arg("--Output=JSON")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Launch {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_owned(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        parse_mediainfo_json(&output.stdout)
    }
}

/// Parses `mediainfo --Output=JSON` output into a [`ProbeReport`].
pub fn parse_mediainfo_json(raw: &[u8]) -> Result<ProbeReport, ProbeError> {
    let json: serde_json::Value = serde_json::from_slice(raw)?;
    let tracks = json
        .get("media")
        .and_then(|media| media.get("track"))
        .and_then(|tracks| tracks.as_array())
        .ok_or(ProbeError::MissingMedia)?;
    Ok(ProbeReport {
        tracks: tracks.iter().filter_map(parse_track).collect(),
    })
}

fn parse_track(json: &serde_json::Value) -> Option<Track> {
    let object = json.as_object()?;
    let kind = object
        .get("@type")
        .and_then(|tag| tag.as_str())
        .map(TrackKind::from_type_tag)
        .unwrap_or(TrackKind::Other);
    let mut track = Track::new(kind);
    flatten_attributes(object, &mut track.attributes);
    Some(track)
}

fn flatten_attributes(
    object: &serde_json::Map<String, serde_json::Value>,
    into: &mut HashMap<String, AttrValue>,
) {
    for (key, value) in object {
        if key.starts_with('@') {
            continue;
        }
        if let serde_json::Value::Object(nested) = value {
            flatten_attributes(nested, into);
            continue;
        }
        if let Some(value) = json_to_attr(value) {
            into.entry(snake_case(key)).or_insert(value);
        }
    }
}

fn json_to_attr(json: &serde_json::Value) -> Option<AttrValue> {
    match json {
        serde_json::Value::String(text) => Some(AttrValue::Text(text.clone())),
        serde_json::Value::Number(number) => number.as_f64().map(AttrValue::Number),
        serde_json::Value::Bool(flag) => Some(AttrValue::Text(flag.to_string())),
        serde_json::Value::Array(items) => Some(AttrValue::List(
            items.iter().filter_map(json_to_attr).collect(),
        )),
        serde_json::Value::Null | serde_json::Value::Object(_) => None,
    }
}

/// `BitRate` → `bit_rate`, `HDR_Format` → `hdr_format`, `CodecID` → `codec_id`.
pub fn snake_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if matches!(previous, Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit()) {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
        previous = Some(c);
    }
    result
}
