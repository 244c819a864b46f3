//! Schema-driven decoding of MPD response lines into typed records.
//!
//! A record type implements [`FromFields`] by returning a [`Schema`]: an
//! ordered list of [`FieldSpec`]s built with a small fluent builder,
//! rather than reflecting over the target struct at runtime. Each spec
//! pairs an MPD key with a setter closure that coerces the line's value
//! and assigns it.

use crate::error::Error;

/// A single field mapping: an MPD key, whether it starts a new record
/// during multi-record parsing, and how to assign its coerced value.
pub struct FieldSpec<T> {
    key: &'static str,
    is_new_element: bool,
    set: Box<dyn Fn(&mut T, &str) -> Result<(), Error> + Send + Sync>,
}

/// An ordered set of field mappings for a record type `T`.
pub struct Schema<T> {
    fields: Vec<FieldSpec<T>>,
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Schema { fields: Vec::new() }
    }
}

impl<T> Schema<T> {
    pub fn new() -> Schema<T> {
        Schema::default()
    }

    /// Declare a field keyed by `key`, assigned via `set`.
    pub fn field(
        mut self,
        key: &'static str,
        set: impl Fn(&mut T, &str) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Schema<T> {
        self.fields.push(FieldSpec {
            key,
            is_new_element: false,
            set: Box::new(set),
        });
        self
    }

    /// Declare a field that also marks the start of a new record when
    /// parsing multiple records (section 4.2's "new-element key").
    pub fn new_element_field(
        mut self,
        key: &'static str,
        set: impl Fn(&mut T, &str) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Schema<T> {
        self.fields.push(FieldSpec {
            key,
            is_new_element: true,
            set: Box::new(set),
        });
        self
    }

    fn find(&self, key: &str) -> Option<&FieldSpec<T>> {
        self.fields.iter().find(|f| f.key == key)
    }

    fn has_new_element_key(&self, key: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.is_new_element && f.key == key)
    }

    fn any_new_element_declared(&self) -> bool {
        self.fields.iter().any(|f| f.is_new_element)
    }
}

/// A record type decodable from MPD `key: value` lines.
pub trait FromFields: Sized {
    fn schema() -> Schema<Self>;
}

/// Split a response line once on `:`, trimming the value. Empty lines
/// (section 3: "Empty lines in the body are skipped") are not handled
/// here — callers filter them before calling this.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let key = &line[..idx];
    let value = line[idx + 1..].trim_start();
    Some((key, value))
}

/// Decode a slice of response lines into a single record (section 4.2,
/// "Single-record parse").
pub fn parse_single<T: FromFields + Default>(lines: &[String]) -> Result<T, Error> {
    let schema = T::schema();
    let mut record = T::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = split_line(line) else {
            continue;
        };
        if let Some(spec) = schema.find(key) {
            (spec.set)(&mut record, value)?;
        }
    }
    Ok(record)
}

/// Decode a slice of response lines into a vector of records (section
/// 4.2, "Multi-record parse"). Requires the schema to declare at least
/// one new-element key.
pub fn parse_multi<T: FromFields + Default>(lines: &[String]) -> Result<Vec<T>, Error> {
    let schema = T::schema();
    if !schema.any_new_element_declared() {
        return Err(Error::Schema(
            "parse_multi requires at least one new-element key",
        ));
    }

    let mut records = Vec::new();
    let mut current: Option<T> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = split_line(line) else {
            continue;
        };
        if schema.has_new_element_key(key) {
            if let Some(finished) = current.take() {
                records.push(finished);
            }
            current = Some(T::default());
        }
        if let Some(spec) = schema.find(key) {
            if let Some(record) = current.as_mut() {
                (spec.set)(record, value)?;
            }
        }
    }
    if let Some(finished) = current.take() {
        records.push(finished);
    }
    Ok(records)
}

/// Field-type coercion helpers for use inside [`Schema`] setter closures.
pub mod field {
    use crate::error::Error;
    use chrono::{DateTime, Utc};

    pub fn string(_field: &'static str, target: &mut String, value: &str) -> Result<(), Error> {
        *target = value.to_owned();
        Ok(())
    }

    pub fn int(field: &'static str, target: &mut i64, value: &str) -> Result<(), Error> {
        *target = atoi::atoi::<i64>(value.as_bytes()).ok_or_else(|| Error::Parse {
            field,
            value: value.to_owned(),
        })?;
        Ok(())
    }

    pub fn u16(field: &'static str, target: &mut u16, value: &str) -> Result<(), Error> {
        *target = atoi::atoi::<u16>(value.as_bytes()).ok_or_else(|| Error::Parse {
            field,
            value: value.to_owned(),
        })?;
        Ok(())
    }

    pub fn bool(field: &'static str, target: &mut bool, value: &str) -> Result<(), Error> {
        *target = match value {
            "0" | "false" => false,
            "1" | "true" => true,
            _ => {
                return Err(Error::Parse {
                    field,
                    value: value.to_owned(),
                })
            }
        };
        Ok(())
    }

    pub fn timestamp(
        field: &'static str,
        target: &mut DateTime<Utc>,
        value: &str,
    ) -> Result<(), Error> {
        *target = DateTime::parse_from_rfc3339(value)
            .map_err(|_| Error::Parse {
                field,
                value: value.to_owned(),
            })?
            .with_timezone(&Utc);
        Ok(())
    }

    pub fn opt_string(
        _field: &'static str,
        target: &mut Option<String>,
        value: &str,
    ) -> Result<(), Error> {
        *target = Some(value.to_owned());
        Ok(())
    }

    pub fn opt_int(
        field: &'static str,
        target: &mut Option<i64>,
        value: &str,
    ) -> Result<(), Error> {
        *target = Some(atoi::atoi::<i64>(value.as_bytes()).ok_or_else(|| Error::Parse {
            field,
            value: value.to_owned(),
        })?);
        Ok(())
    }

    pub fn opt_u16(
        field: &'static str,
        target: &mut Option<u16>,
        value: &str,
    ) -> Result<(), Error> {
        *target = Some(atoi::atoi::<u16>(value.as_bytes()).ok_or_else(|| Error::Parse {
            field,
            value: value.to_owned(),
        })?);
        Ok(())
    }

    pub fn opt_bool(
        field: &'static str,
        target: &mut Option<bool>,
        value: &str,
    ) -> Result<(), Error> {
        *target = Some(match value {
            "0" | "false" => false,
            "1" | "true" => true,
            _ => {
                return Err(Error::Parse {
                    field,
                    value: value.to_owned(),
                })
            }
        });
        Ok(())
    }

    pub fn opt_timestamp(
        field: &'static str,
        target: &mut Option<DateTime<Utc>>,
        value: &str,
    ) -> Result<(), Error> {
        *target = Some(
            DateTime::parse_from_rfc3339(value)
                .map_err(|_| Error::Parse {
                    field,
                    value: value.to_owned(),
                })?
                .with_timezone(&Utc),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Eq)]
    struct Status {
        volume: i64,
        repeat: bool,
        state: String,
    }

    impl FromFields for Status {
        fn schema() -> Schema<Status> {
            Schema::new()
                .field("volume", |t, v| field::int("volume", &mut t.volume, v))
                .field("repeat", |t, v| field::bool("repeat", &mut t.repeat, v))
                .field("state", |t, v| field::string("state", &mut t.state, v))
        }
    }

    #[derive(Debug, Default, PartialEq, Eq)]
    struct Song {
        file: String,
        title: String,
    }

    impl FromFields for Song {
        fn schema() -> Schema<Song> {
            Schema::new()
                .new_element_field("file", |t, v| field::string("file", &mut t.file, v))
                .field("Title", |t, v| field::string("title", &mut t.title, v))
        }
    }

    fn lines(s: &[&str]) -> Vec<String> {
        s.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn parses_single_record() {
        let status: Status =
            parse_single(&lines(&["volume: 42", "repeat: 1", "state: play"])).unwrap();
        assert_eq!(
            status,
            Status {
                volume: 42,
                repeat: true,
                state: "play".into()
            }
        );
    }

    #[test]
    fn skips_empty_lines_and_unknown_keys() {
        let status: Status = parse_single(&lines(&["", "volume: 7", "bogus: x"])).unwrap();
        assert_eq!(status.volume, 7);
    }

    #[test]
    fn coercion_failure_is_tagged_parse_error() {
        let err = parse_single::<Status>(&lines(&["volume: nope"])).unwrap_err();
        match err {
            Error::Parse { field, value } => {
                assert_eq!(field, "volume");
                assert_eq!(value, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cuts_multi_records_on_new_element_key() {
        let songs: Vec<Song> = parse_multi(&lines(&[
            "file: a.mp3",
            "Title: A",
            "file: b.mp3",
            "Title: B",
        ]))
        .unwrap();
        assert_eq!(
            songs,
            vec![
                Song {
                    file: "a.mp3".into(),
                    title: "A".into()
                },
                Song {
                    file: "b.mp3".into(),
                    title: "B".into()
                },
            ]
        );
    }

    #[test]
    fn multi_parse_without_new_element_key_is_error() {
        let err = parse_multi::<Status>(&lines(&["volume: 1"])).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
