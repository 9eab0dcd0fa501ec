//! # Duplex Library
//!
//! The example domain synchronized by Duplex: people and the books they
//! wrote. A book references its authors, so people are declared before
//! books and are always created first on commit.
//!
//! ```rust,ignore
//! use duplex_library::{Catalog, Library};
//!
//! let mut library = Library::new("replica-a");
//! let ada = library.add_person("Ada Lovelace")?;
//! library.add_book("Notes", &[ada])?;
//! ```

pub mod catalog;
pub mod error;

pub use catalog::{Catalog, Library};
pub use error::{Error, Result};

use duplex_engine::{decode_fields, encode_fields, DuplicateStatus, Fields, ItemRef, Payload};
use serde::{Deserialize, Serialize};

pub const PERSON: &str = "person";
pub const BOOK: &str = "book";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    /// Indices into the item's references, in author order
    pub authors: Vec<usize>,
}

impl Book {
    /// Author identities in order, resolved through the item's references.
    fn author_identities<'a>(&self, refs: &'a [ItemRef]) -> Vec<Option<&'a duplex_engine::ItemIdentity>> {
        self.authors
            .iter()
            .map(|index| refs.get(*index).map(|r| &r.identity))
            .collect()
    }
}

/// A synchronized library item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryItem {
    Person(Person),
    Book(Book),
}

impl Payload for LibraryItem {
    fn item_types() -> &'static [&'static str] {
        &[PERSON, BOOK]
    }

    fn item_type(&self) -> &'static str {
        match self {
            LibraryItem::Person(_) => PERSON,
            LibraryItem::Book(_) => BOOK,
        }
    }

    fn to_fields(&self) -> duplex_engine::error::Result<Fields> {
        match self {
            LibraryItem::Person(person) => encode_fields(person),
            LibraryItem::Book(book) => encode_fields(book),
        }
    }

    fn from_fields(item_type: &str, fields: Fields) -> duplex_engine::error::Result<Self> {
        match item_type {
            PERSON => decode_fields(fields).map(LibraryItem::Person),
            BOOK => decode_fields(fields).map(LibraryItem::Book),
            other => Err(duplex_engine::Error::UnknownItemType(other.to_string())),
        }
    }

    /// Equal names are exact duplicates, names differing only in case are
    /// possible ones. Books compare title and ordered author identities.
    fn duplicate_status(&self, refs: &[ItemRef], other: &Self, other_refs: &[ItemRef]) -> DuplicateStatus {
        match (self, other) {
            (LibraryItem::Person(a), LibraryItem::Person(b)) => {
                if a.name == b.name {
                    DuplicateStatus::Exact
                } else if a.name.to_lowercase() == b.name.to_lowercase() {
                    DuplicateStatus::Possible
                } else {
                    DuplicateStatus::None
                }
            }
            (LibraryItem::Book(a), LibraryItem::Book(b)) if a.title == b.title => {
                if a.author_identities(refs) == b.author_identities(other_refs) {
                    DuplicateStatus::Exact
                } else {
                    DuplicateStatus::Possible
                }
            }
            _ => DuplicateStatus::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_engine::{ItemIdentity, Stamp};
    use serde_json::json;

    fn person(name: &str) -> LibraryItem {
        LibraryItem::Person(Person { name: name.into() })
    }

    fn author(replica: &str, tick: u64) -> ItemRef {
        let stamp = Stamp::new(replica, tick);
        ItemRef::new(ItemIdentity::new(PERSON, &stamp), stamp)
    }

    #[test]
    fn people_are_declared_before_books() {
        assert_eq!(LibraryItem::item_types(), &["person", "book"]);
    }

    #[test]
    fn person_names_decide_duplicates() {
        assert_eq!(
            person("Ada").duplicate_status(&[], &person("Ada"), &[]),
            DuplicateStatus::Exact
        );
        assert_eq!(
            person("Ada").duplicate_status(&[], &person("ADA"), &[]),
            DuplicateStatus::Possible
        );
        assert_eq!(
            person("Ada").duplicate_status(&[], &person("Grace"), &[]),
            DuplicateStatus::None
        );
    }

    #[test]
    fn books_compare_author_identities_in_order() {
        let book = LibraryItem::Book(Book {
            title: "Notes".into(),
            authors: vec![0, 1],
        });
        let same = [author("a", 1), author("a", 2)];
        // Same authors at different modification stamps
        let restamped = [
            ItemRef::new(same[0].identity.clone(), Stamp::new("b", 9)),
            ItemRef::new(same[1].identity.clone(), Stamp::new("b", 10)),
        ];
        let swapped = [author("a", 2), author("a", 1)];

        assert_eq!(book.duplicate_status(&same, &book, &restamped), DuplicateStatus::Exact);
        assert_eq!(book.duplicate_status(&same, &book, &swapped), DuplicateStatus::Possible);
    }

    #[test]
    fn books_and_people_never_match() {
        let book = LibraryItem::Book(Book {
            title: "Ada".into(),
            authors: vec![],
        });
        assert_eq!(person("Ada").duplicate_status(&[], &book, &[]), DuplicateStatus::None);
    }

    #[test]
    fn fields_use_author_indices() {
        let book = LibraryItem::Book(Book {
            title: "Notes".into(),
            authors: vec![0],
        });
        let fields = book.to_fields().unwrap();
        assert_eq!(fields.get("title"), Some(&json!("Notes")));
        assert_eq!(fields.get("authors"), Some(&json!([0])));
        assert_eq!(LibraryItem::from_fields(BOOK, fields).unwrap(), book);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let fields = person("Ada").to_fields().unwrap();
        assert!(matches!(
            LibraryItem::from_fields("magazine", fields),
            Err(duplex_engine::Error::UnknownItemType(_))
        ));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn person_duplicates_are_symmetric(a in "[a-zA-Z ]{0,12}", b in "[a-zA-Z ]{0,12}") {
                let (a, b) = (person(&a), person(&b));
                prop_assert_eq!(
                    a.duplicate_status(&[], &b, &[]),
                    b.duplicate_status(&[], &a, &[])
                );
            }

            #[test]
            fn every_person_duplicates_itself(name in ".{0,24}") {
                let p = person(&name);
                prop_assert_eq!(p.duplicate_status(&[], &p, &[]), DuplicateStatus::Exact);
            }
        }
    }
}
