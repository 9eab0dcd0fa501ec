//! Typed catalog operations over the in-memory store.

use crate::{Book, Error, LibraryItem, Person, Result, BOOK, PERSON};
use duplex_engine::{ItemIdentity, MemoryStore, Stamp};

/// A replica of the library.
pub type Library = MemoryStore<LibraryItem>;

/// People and books on top of a [`Library`] store.
pub trait Catalog {
    fn add_person(&mut self, name: &str) -> Result<ItemIdentity>;
    fn add_book(&mut self, title: &str, authors: &[ItemIdentity]) -> Result<ItemIdentity>;
    fn rename_person(&mut self, person: &ItemIdentity, name: &str) -> Result<Stamp>;
    fn retitle_book(&mut self, book: &ItemIdentity, title: &str) -> Result<Stamp>;
    fn remove(&mut self, item: &ItemIdentity) -> Result<Stamp>;

    fn person(&self, person: &ItemIdentity) -> Result<&Person>;
    fn book(&self, book: &ItemIdentity) -> Result<&Book>;
    fn people(&self) -> Vec<(ItemIdentity, Person)>;
    fn books(&self) -> Vec<(ItemIdentity, Book)>;
    /// Names of a book's authors in order, following folded duplicates.
    fn author_names(&self, book: &ItemIdentity) -> Result<Vec<String>>;
}

impl Catalog for Library {
    fn add_person(&mut self, name: &str) -> Result<ItemIdentity> {
        let person = LibraryItem::Person(Person { name: name.into() });
        Ok(self.create(person, vec![])?)
    }

    fn add_book(&mut self, title: &str, authors: &[ItemIdentity]) -> Result<ItemIdentity> {
        for author in authors {
            self.person(&self.resolve(author))?;
        }
        let book = LibraryItem::Book(Book {
            title: title.into(),
            authors: (0..authors.len()).collect(),
        });
        Ok(self.create(book, authors.to_vec())?)
    }

    fn rename_person(&mut self, person: &ItemIdentity, name: &str) -> Result<Stamp> {
        self.person(person)?;
        let renamed = LibraryItem::Person(Person { name: name.into() });
        Ok(self.update(person, renamed, vec![])?)
    }

    fn retitle_book(&mut self, book: &ItemIdentity, title: &str) -> Result<Stamp> {
        let current = self.book(book)?.clone();
        let refs: Vec<ItemIdentity> = self
            .get(book)
            .map(|item| item.refs.iter().map(|r| r.identity.clone()).collect())
            .unwrap_or_default();
        let retitled = LibraryItem::Book(Book {
            title: title.into(),
            authors: current.authors,
        });
        Ok(self.update(book, retitled, refs)?)
    }

    fn remove(&mut self, item: &ItemIdentity) -> Result<Stamp> {
        Ok(self.delete(item)?)
    }

    fn person(&self, person: &ItemIdentity) -> Result<&Person> {
        match self.get(person).map(|item| &item.payload) {
            Some(Some(LibraryItem::Person(p))) => Ok(p),
            Some(_) => Err(Error::NotAPerson(person.clone())),
            None => Err(Error::NotFound(person.clone())),
        }
    }

    fn book(&self, book: &ItemIdentity) -> Result<&Book> {
        match self.get(book).map(|item| &item.payload) {
            Some(Some(LibraryItem::Book(b))) => Ok(b),
            Some(_) => Err(Error::NotABook(book.clone())),
            None => Err(Error::NotFound(book.clone())),
        }
    }

    fn people(&self) -> Vec<(ItemIdentity, Person)> {
        self.live_of_type(PERSON)
            .filter_map(|item| match &item.payload {
                Some(LibraryItem::Person(p)) => Some((item.identity.clone(), p.clone())),
                _ => None,
            })
            .collect()
    }

    fn books(&self) -> Vec<(ItemIdentity, Book)> {
        self.live_of_type(BOOK)
            .filter_map(|item| match &item.payload {
                Some(LibraryItem::Book(b)) => Some((item.identity.clone(), b.clone())),
                _ => None,
            })
            .collect()
    }

    fn author_names(&self, book: &ItemIdentity) -> Result<Vec<String>> {
        let authors = self.book(book)?.authors.clone();
        let refs = self.get(book).map(|item| item.refs.clone()).unwrap_or_default();

        authors
            .iter()
            .map(|index| -> Result<String> {
                let author = refs
                    .get(*index)
                    .ok_or_else(|| Error::NotFound(book.clone()))?;
                let person = self.person(&self.resolve(&author.identity))?;
                Ok(person.name.clone())
            })
            .collect()
    }
}
