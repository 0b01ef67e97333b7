//! Whole-stack tests: two memory adapters, one with a custom mapping,
//! queried and written through the facade.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use relmap::prelude::*;
use relmap::{BasicType, Cache, Find, PropertyKind};

/// Stores booleans as "Y"/"N" and datetimes as unix seconds.
struct LegacyMapping;

impl Mapping for LegacyMapping {
    fn map_value(&self, property: &Property, value: Value) -> Result<Value> {
        Ok(match (property.kind(), value) {
            (PropertyKind::Basic(BasicType::Boolean), Value::Text(flag)) => {
                Value::Bool(flag == "Y")
            }
            (_, other) => other,
        })
    }

    fn unmap_value(&self, _property: &Property, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Bool(flag) => Value::Text(if flag { "Y" } else { "N" }.to_string()),
            Value::DateTime(dt) => Value::BigInt(dt.and_utc().timestamp()),
            other => other,
        })
    }
}

fn born(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

struct Library {
    registry: Arc<SchemaRegistry>,
    sql: Arc<MemoryAdapter>,
    docs: Arc<MemoryAdapter>,
    cache: Arc<MemoryCache>,
    connection: Arc<Connection>,
}

impl Library {
    fn new() -> Self {
        let registry = SchemaRegistry::builder()
            .entity(
                EntitySchema::new("Author")
                    .adapter("sql", "authors")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name"))
                    .property(Property::boolean("active"))
                    .property(Property::datetime("born").mapped_as("born_at"))
                    .property(Property::integer("publisher_id"))
                    .property(Property::many_to_one("publisher", "Publisher", "publisher_id"))
                    .property(Property::one_to_many("books", "Book", "author_id"))
                    .property(Property::many_to_many(
                        "tags",
                        "Tag",
                        "author_id",
                        "author_tags",
                        "tag_id",
                    )),
            )
            .entity(
                EntitySchema::new("Publisher")
                    .adapter("sql", "publishers")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name")),
            )
            .entity(
                EntitySchema::new("Book")
                    .adapter("docs", "books")
                    .property(Property::integer("id").primary())
                    .property(Property::string("title"))
                    .property(Property::integer("author_id")),
            )
            .entity(
                EntitySchema::new("Tag")
                    .adapter("docs", "tags")
                    .property(Property::integer("id").primary())
                    .property(Property::string("label")),
            )
            .build()
            .unwrap();

        let sql = Arc::new(
            MemoryAdapter::new("sql")
                .with_mapping(Arc::new(LegacyMapping))
                .seed(
                    "publishers",
                    vec![Record::new().with("id", 3).with("name", "Taylor & Francis")],
                ),
        );
        let docs = Arc::new(MemoryAdapter::new("docs"));
        let cache = Arc::new(MemoryCache::default());
        let connection = Arc::new(
            Connection::builder(Arc::clone(&registry))
                .adapter(sql.clone())
                .adapter(docs.clone())
                .cache(cache.clone())
                .build()
                .unwrap(),
        );
        Self {
            registry,
            sql,
            docs,
            cache,
            connection,
        }
    }

    fn seeded() -> Self {
        let library = Self::new();
        let sql = Arc::clone(&library.sql);
        let docs = Arc::clone(&library.docs);
        for row in [
            Record::new()
                .with("id", 1)
                .with("name", "Ada")
                .with("active", "Y")
                .with("born_at", born(1815, 12, 10).and_utc().timestamp())
                .with("publisher_id", 3),
            Record::new()
                .with("id", 2)
                .with("name", "Grace")
                .with("active", "N")
                .with("publisher_id", 99),
        ] {
            sql.insert("authors", row).unwrap();
        }
        for (author, tag) in [(1, 20), (1, 21), (2, 21)] {
            sql.insert(
                "author_tags",
                Record::new().with("author_id", author).with("tag_id", tag),
            )
            .unwrap();
        }
        for (id, title) in [(10, "Notes"), (11, "Sketch")] {
            docs.insert(
                "books",
                Record::new()
                    .with("id", id)
                    .with("title", title)
                    .with("author_id", 1),
            )
            .unwrap();
        }
        for (id, label) in [(20, "math"), (21, "computing")] {
            docs.insert("tags", Record::new().with("id", id).with("label", label))
                .unwrap();
        }
        library
    }

    fn repository(&self, entity: &str) -> Repository {
        Repository::new(Arc::clone(&self.connection), entity).unwrap()
    }

    fn entity(&self, name: &str, values: &[(&str, EntityValue)]) -> Entity {
        Entity::from_values(
            self.registry.require(name).unwrap(),
            values.iter().map(|(k, v)| (*k, v.clone())),
        )
        .unwrap()
    }
}

#[test]
fn adapter_mapping_applies_in_both_directions() {
    let library = Library::new();
    let authors = library.repository("Author");

    let mut ada = library.entity(
        "Author",
        &[
            ("name", EntityValue::from("Ada")),
            ("active", EntityValue::from(true)),
            ("born", EntityValue::from(born(1815, 12, 10))),
        ],
    );
    authors.save(&mut ada).unwrap();
    assert_eq!(ada.get_i64("id"), Some(1));

    let stored = library.sql.rows("authors");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("active"), Some(&Value::Text("Y".into())));
    assert_eq!(
        stored[0].get("born_at"),
        Some(&Value::BigInt(born(1815, 12, 10).and_utc().timestamp()))
    );
    assert!(!stored[0].contains("born"));

    let loaded = authors.find_one(1).unwrap().unwrap();
    assert_eq!(loaded.get_bool("active"), Some(true));
    assert_eq!(loaded.get_datetime("born"), Some(born(1815, 12, 10)));
    assert_eq!(loaded.get_str("name"), Some("Ada"));

    // Condition values go through the same mapping.
    let active = authors
        .find()
        .where_("active", Operator::Eq, true)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[test]
fn local_and_remote_associations_become_typed_entities() {
    let library = Library::seeded();
    let authors = library
        .repository("Author")
        .find()
        .associate(&["publisher", "books", "tags"])
        .unwrap()
        .order_by("id", Direction::Asc)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(authors.len(), 2);

    let ada = authors.get(0).unwrap();
    assert_eq!(
        ada.entity("publisher").and_then(|p| p.get_str("name")),
        Some("Taylor & Francis")
    );
    let titles: Vec<_> = ada
        .collection("books")
        .unwrap()
        .iter()
        .filter_map(|b| b.get_str("title"))
        .collect();
    assert_eq!(titles, ["Notes", "Sketch"]);
    let labels: Vec<_> = ada
        .collection("tags")
        .unwrap()
        .iter()
        .filter_map(|t| t.get_str("label"))
        .collect();
    assert_eq!(labels, ["math", "computing"]);

    // Grace references a missing publisher and has no books.
    let grace = authors.get(1).unwrap();
    assert!(grace.entity("publisher").is_none());
    assert!(!grace.is_set("books"));
    assert_eq!(grace.collection("tags").map(EntityCollection::len), Some(1));
    assert_eq!(grace.get_bool("active"), Some(false));
}

#[test]
fn cached_rows_are_served_until_a_write() {
    let library = Library::seeded();
    let authors = library.repository("Author");
    let query = authors
        .find()
        .associate(&["books"])
        .unwrap()
        .cached(true, CacheOptions::new())
        .unwrap();
    let key = query.cache_key().unwrap();

    let first = query.run().unwrap();
    let payload = library.cache.load(&key).unwrap();
    let rows: Vec<Record> = serde_json::from_value(payload).unwrap();
    assert_eq!(rows.len(), 2);
    let ada_books = rows
        .iter()
        .find(|r| r.get("id").and_then(Value::as_i64) == Some(1))
        .and_then(|r| r.get("books"))
        .and_then(Value::as_array)
        .map(<[Value]>::len);
    assert_eq!(ada_books, Some(2));

    library.sql.insert("authors", Record::new().with("name", "Barbara")).unwrap();
    let second = query.run().unwrap();
    assert_eq!(first, second);
    assert_eq!(library.cache.hits(&key), 2);

    let mut barbara = authors.find_one(3).unwrap().unwrap();
    barbara.set("name", "Barbara Liskov").unwrap();
    authors.save(&mut barbara).unwrap();
    assert!(!library.cache.contains(&key));
    assert_eq!(query.run().unwrap().len(), 3);
}

fn search(authors: &Repository) -> Find<'_> {
    authors
        .find()
        .where_("name", Operator::Like, "A%")
        .unwrap()
        .associate(&["books"])
        .unwrap()
        .limit(5)
}

#[test]
fn checksum_is_stable_and_sensitive() {
    let library = Library::seeded();
    let authors = library.repository("Author");
    assert_eq!(
        search(&authors).checksum().unwrap(),
        search(&authors).checksum().unwrap()
    );
    assert_ne!(
        search(&authors).checksum().unwrap(),
        search(&authors).offset(5).checksum().unwrap()
    );
    assert!(search(&authors).cache_key().unwrap().starts_with("relmap.find."));
}

#[test]
fn association_changes_are_written_to_their_adapters() {
    let library = Library::seeded();
    let authors = library.repository("Author");

    let mut barbara = library.entity("Author", &[("name", EntityValue::from("Barbara"))]);
    let book = library.entity("Book", &[("title", EntityValue::from("Abstraction"))]);
    barbara.changes_mut("books").unwrap().add(book).unwrap();
    barbara.changes_mut("tags").unwrap().attach(20).unwrap();
    barbara.changes_mut("publisher").unwrap().attach(3).unwrap();
    authors.save(&mut barbara).unwrap();
    let id = barbara.get_i64("id").unwrap();

    let books = library.docs.rows("books");
    let written = books
        .iter()
        .find(|b| b.get("title") == Some(&Value::Text("Abstraction".into())))
        .unwrap();
    assert_eq!(written.get("author_id").and_then(Value::as_i64), Some(id));

    assert!(library.sql.rows("author_tags").iter().any(|link| {
        link.get("author_id").and_then(Value::as_i64) == Some(id)
            && link.get("tag_id").and_then(Value::as_i64) == Some(20)
    }));
    assert_eq!(barbara.get_i64("publisher_id"), Some(3));

    let loaded = authors
        .query()
        .find_one(id)
        .unwrap()
        .associate(&["books", "tags", "publisher"])
        .unwrap()
        .run()
        .unwrap()
        .unwrap();
    assert_eq!(loaded.collection("books").map(EntityCollection::len), Some(1));
    assert_eq!(loaded.collection("tags").map(EntityCollection::len), Some(1));
    assert!(loaded.entity("publisher").is_some());
}

#[test]
fn missing_association_adapter_is_reported() {
    let library = Library::new();
    let connection = Connection::builder(Arc::clone(&library.registry))
        .adapter(library.sql.clone())
        .build()
        .unwrap();
    let err = connection
        .query("Author")
        .unwrap()
        .find()
        .associate(&["books"])
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::Query(_)), "{err}");
}
