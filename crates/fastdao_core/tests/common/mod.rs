#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use fastdao_core::db::{ConnectionGuard, SqliteSource};
use fastdao_core::{
    retrieve_fn, store_fn, ConvertError, Entity, EntityDescriptor, FieldDef, FieldError,
    FieldKind, FieldValue, LobKind,
};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const SCHEMA: &str = "
CREATE TABLE books (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    page_count INTEGER NOT NULL CHECK (page_count >= 0),
    status TEXT NOT NULL,
    published TEXT,
    summary TEXT,
    cover BLOB,
    author INTEGER
);
CREATE TABLE tags (
    id INTEGER PRIMARY KEY,
    labels TEXT NOT NULL
);
CREATE TABLE events (
    events_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    at TEXT NOT NULL
);
CREATE TABLE tokens (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL
);
CREATE TABLE readings (
    id INTEGER PRIMARY KEY,
    book_id INTEGER REFERENCES books(id) DEFERRABLE INITIALLY DEFERRED,
    rating REAL NOT NULL,
    finished INTEGER NOT NULL,
    started TEXT
);
";

pub fn memory_source() -> Arc<SqliteSource> {
    let source = SqliteSource::in_memory().unwrap();
    apply_schema(&source);
    Arc::new(source)
}

pub fn file_source(path: &Path) -> Arc<SqliteSource> {
    let source = SqliteSource::open(path).unwrap();
    apply_schema(&source);
    Arc::new(source)
}

fn apply_schema(source: &SqliteSource) {
    let conn = ConnectionGuard::acquire(source).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Draft,
    Published,
    Retired,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Published => "Published",
            Self::Retired => "Retired",
        }
    }

    fn parse(field: &str, name: &str) -> Result<Self, FieldError> {
        match name {
            "Draft" => Ok(Self::Draft),
            "Published" => Ok(Self::Published),
            "Retired" => Ok(Self::Retired),
            other => Err(FieldError::invalid(field, format!("unknown status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub pages: i64,
    pub status: Status,
    pub published: Option<NaiveDate>,
    pub summary: Option<String>,
    pub cover: Option<Vec<u8>>,
    pub author: Option<i64>,
}

impl Book {
    pub fn new(title: &str, pages: i64) -> Self {
        Self {
            title: title.to_string(),
            pages,
            ..Self::default()
        }
    }
}

impl Entity for Book {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .table("books")
            .field(FieldDef::key("id", FieldKind::Integer))
            .field(FieldDef::new("title", FieldKind::Text))
            .field(FieldDef::new("pages", FieldKind::Integer).column("page_count"))
            .field(FieldDef::new("status", FieldKind::Enum))
            .field(FieldDef::new("published", FieldKind::Date))
            .field(FieldDef::new("summary", FieldKind::Text).lob(LobKind::Clob))
            .field(FieldDef::new("cover", FieldKind::Bytes).lob(LobKind::Blob))
            .field(FieldDef::new("author", FieldKind::Reference))
    }

    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError> {
        Ok(match field {
            "id" => self.id.into(),
            "title" => self.title.clone().into(),
            "pages" => self.pages.into(),
            "status" => FieldValue::enumeration(self.status.as_str()),
            "published" => self.published.into(),
            "summary" => self.summary.clone().into(),
            "cover" => self.cover.clone().into(),
            "author" => self.author.map_or(FieldValue::Null, FieldValue::reference),
            other => return Err(FieldError::UnknownField(other.to_string())),
        })
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        match field {
            "id" => self.id = value.into_typed(field)?,
            "title" => self.title = value.into_typed(field)?,
            "pages" => self.pages = value.into_typed(field)?,
            "status" => {
                let name: String = value.into_typed(field)?;
                self.status = Status::parse(field, &name)?;
            }
            "published" => self.published = value.into_typed(field)?,
            "summary" => self.summary = value.into_typed(field)?,
            "cover" => self.cover = value.into_typed(field)?,
            "author" => self.author = value.into_typed(field)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

/// Labels stored as one comma-separated column through converters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: Option<i64>,
    pub labels: Vec<String>,
}

impl Entity for Tag {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .table("tags")
            .field(FieldDef::key("id", FieldKind::Integer))
            .field(
                FieldDef::new("labels", FieldKind::Text)
                    .store_with(store_fn(|_, value| match value {
                        FieldValue::Bytes(joined) => String::from_utf8(joined)
                            .map(FieldValue::Text)
                            .map_err(|err| ConvertError::with_source("labels are not UTF-8", err)),
                        other => Err(ConvertError::new(format!(
                            "labels expect bytes, got {}",
                            other.type_name()
                        ))),
                    }))
                    .retrieve_with(retrieve_fn(|value| match value {
                        FieldValue::Text(joined) => Ok(FieldValue::Bytes(joined.into_bytes())),
                        other => Err(ConvertError::new(format!(
                            "labels column holds {}",
                            other.type_name()
                        ))),
                    })),
            )
    }

    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError> {
        match field {
            "id" => Ok(self.id.into()),
            "labels" => Ok(FieldValue::Bytes(self.labels.join(",").into_bytes())),
            other => Err(FieldError::UnknownField(other.to_string())),
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        match field {
            "id" => self.id = value.into_typed(field)?,
            "labels" => {
                let raw: Vec<u8> = value.into_typed(field)?;
                let joined = String::from_utf8(raw)
                    .map_err(|_| FieldError::invalid(field, "labels are not UTF-8"))?;
                self.labels = joined
                    .split(',')
                    .filter(|label| !label.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

/// Keyless entity: rows are addressed through the `events_id` column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub name: String,
    pub at: NaiveDateTime,
}

impl Entity for Event {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .table("events")
            .field(FieldDef::new("name", FieldKind::Text))
            .field(FieldDef::new("at", FieldKind::DateTime))
    }

    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError> {
        match field {
            "name" => Ok(self.name.clone().into()),
            "at" => Ok(self.at.into()),
            other => Err(FieldError::UnknownField(other.to_string())),
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        match field {
            "name" => self.name = value.into_typed(field)?,
            "at" => self.at = value.into_typed(field)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Token {
    pub id: Option<Uuid>,
    pub owner: String,
}

impl Entity for Token {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .table("tokens")
            .field(FieldDef::key("id", FieldKind::Uuid))
            .field(FieldDef::new("owner", FieldKind::Text))
    }

    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError> {
        match field {
            "id" => Ok(self.id.into()),
            "owner" => Ok(self.owner.clone().into()),
            other => Err(FieldError::UnknownField(other.to_string())),
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        match field {
            "id" => self.id = value.into_typed(field)?,
            "owner" => self.owner = value.into_typed(field)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

/// Reading session; `book_id` is checked only when the transaction commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub id: Option<i64>,
    pub book: Option<i64>,
    pub rating: f64,
    pub finished: bool,
    pub started: Option<NaiveTime>,
}

impl Entity for Reading {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .table("readings")
            .field(FieldDef::key("id", FieldKind::Integer))
            .field(FieldDef::new("book", FieldKind::Reference).column("book_id"))
            .field(FieldDef::new("rating", FieldKind::Real))
            .field(FieldDef::new("finished", FieldKind::Bool))
            .field(FieldDef::new("started", FieldKind::Time))
    }

    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError> {
        Ok(match field {
            "id" => self.id.into(),
            "book" => self.book.map_or(FieldValue::Null, FieldValue::reference),
            "rating" => self.rating.into(),
            "finished" => self.finished.into(),
            "started" => self.started.into(),
            other => return Err(FieldError::UnknownField(other.to_string())),
        })
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError> {
        match field {
            "id" => self.id = value.into_typed(field)?,
            "book" => self.book = value.into_typed(field)?,
            "rating" => self.rating = value.into_typed(field)?,
            "finished" => self.finished = value.into_typed(field)?,
            "started" => self.started = value.into_typed(field)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

pub fn books(count: usize) -> Vec<Book> {
    (0..count)
        .map(|index| Book::new(&format!("volume {index}"), 100 + index as i64))
        .collect()
}
