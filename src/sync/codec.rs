//! Conversion between household records and remote documents.
//!
//! Decoding never fails a whole snapshot: each document either yields a record
//! or an explicit [`Decoded::Skip`], and [`decode_snapshot`] filters the skips
//! out after logging them.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::household::{Color, Event, Person};
use crate::sync::remote::{Collection, RemoteDocument};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeSkip {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Record(T),
    Skip(DecodeSkip),
}

impl<T> Decoded<T> {
    pub fn into_record(self) -> Option<T> {
        match self {
            Decoded::Record(record) => Some(record),
            Decoded::Skip(_) => None,
        }
    }
}

impl<T> From<Result<T, DecodeSkip>> for Decoded<T> {
    fn from(result: Result<T, DecodeSkip>) -> Self {
        match result {
            Ok(record) => Decoded::Record(record),
            Err(skip) => Decoded::Skip(skip),
        }
    }
}

pub trait DocumentCodec: Sized {
    const COLLECTION: Collection;

    fn encode(&self) -> Map<String, Value>;

    fn decode(document: &RemoteDocument, zone: Tz) -> Decoded<Self>;
}

/// Decodes every well-formed document; malformed ones are dropped.
pub fn decode_snapshot<T: DocumentCodec>(documents: &[RemoteDocument], zone: Tz) -> Vec<T> {
    documents
        .iter()
        .filter_map(|document| match T::decode(document, zone) {
            Decoded::Record(record) => Some(record),
            Decoded::Skip(reason) => {
                tracing::warn!(
                    "Dropping malformed {} record {}: {}",
                    T::COLLECTION,
                    document.id,
                    reason
                );
                None
            }
        })
        .collect()
}

impl DocumentCodec for Person {
    const COLLECTION: Collection = Collection::People;

    fn encode(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!(self.name));
        fields.insert(
            "color".to_string(),
            json!({
                "red": self.color.red,
                "green": self.color.green,
                "blue": self.color.blue,
                "alpha": self.color.alpha,
            }),
        );
        fields.insert("isParent".to_string(), json!(self.is_parent));
        fields.insert("ownerId".to_string(), json!(self.owner_id));
        fields
    }

    fn decode(document: &RemoteDocument, _zone: Tz) -> Decoded<Self> {
        let fields = &document.fields;
        let person = (|| -> Result<Person, DecodeSkip> {
            let color = fields
                .get("color")
                .ok_or(DecodeSkip::MissingField("color"))?
                .as_object()
                .ok_or(DecodeSkip::InvalidField("color"))?;
            Ok(Person {
                id: document.id.clone(),
                name: string_field(fields, "name")?,
                color: Color::new(
                    number_field(color, "red")?,
                    number_field(color, "green")?,
                    number_field(color, "blue")?,
                    number_field(color, "alpha")?,
                ),
                is_parent: bool_field(fields, "isParent")?,
                owner_id: string_field(fields, "ownerId")?,
            })
        })();
        person.into()
    }
}

impl DocumentCodec for Event {
    const COLLECTION: Collection = Collection::Events;

    fn encode(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("personId".to_string(), json!(self.person_id));
        fields.insert("eventName".to_string(), json!(self.event_name));
        fields.insert("date".to_string(), json!(timestamp(self.date())));
        fields.insert("responsiblePersonId".to_string(), json!(self.responsible_person_id));
        fields.insert("dayOfWeek".to_string(), json!(self.day_of_week()));
        fields.insert("ownerId".to_string(), json!(self.owner_id));
        fields.insert("isRecurring".to_string(), json!(self.is_recurring));
        if let Some(end) = self.recurrence_end_date {
            fields.insert("recurrenceEndDate".to_string(), json!(timestamp(end)));
        }
        fields
    }

    // `dayOfWeek` on the wire is ignored and re-derived from `date`.
    fn decode(document: &RemoteDocument, zone: Tz) -> Decoded<Self> {
        let fields = &document.fields;
        let event = (|| -> Result<Event, DecodeSkip> {
            let mut event = Event::new(
                string_field(fields, "personId")?,
                string_field(fields, "eventName")?,
                timestamp_field(fields, "date")?,
                string_field(fields, "responsiblePersonId")?,
                string_field(fields, "ownerId")?,
                zone,
            )
            .with_id(document.id.clone());
            event.is_recurring = match fields.get("isRecurring") {
                None | Some(Value::Null) => true,
                Some(value) => value.as_bool().ok_or(DecodeSkip::InvalidField("isRecurring"))?,
            };
            event.recurrence_end_date = match fields.get("recurrenceEndDate") {
                None | Some(Value::Null) => None,
                Some(_) => Some(timestamp_field(fields, "recurrenceEndDate")?),
            };
            Ok(event)
        })();
        event.into()
    }
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn string_field(fields: &Map<String, Value>, name: &'static str) -> Result<String, DecodeSkip> {
    fields
        .get(name)
        .ok_or(DecodeSkip::MissingField(name))?
        .as_str()
        .map(str::to_string)
        .ok_or(DecodeSkip::InvalidField(name))
}

fn bool_field(fields: &Map<String, Value>, name: &'static str) -> Result<bool, DecodeSkip> {
    fields
        .get(name)
        .ok_or(DecodeSkip::MissingField(name))?
        .as_bool()
        .ok_or(DecodeSkip::InvalidField(name))
}

fn number_field(fields: &Map<String, Value>, name: &'static str) -> Result<f64, DecodeSkip> {
    fields
        .get(name)
        .ok_or(DecodeSkip::MissingField(name))?
        .as_f64()
        .ok_or(DecodeSkip::InvalidField(name))
}

fn timestamp_field(fields: &Map<String, Value>, name: &'static str) -> Result<DateTime<Utc>, DecodeSkip> {
    let raw = fields
        .get(name)
        .ok_or(DecodeSkip::MissingField(name))?
        .as_str()
        .ok_or(DecodeSkip::InvalidField(name))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| DecodeSkip::InvalidField(name))
}
