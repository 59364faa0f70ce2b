//! Entity type adaptors: the concrete property-bag types the entity store,
//! type index, and pipeline exercise (spec.md §3, §9 redesign note).
//!
//! Grounded in `original_source/common/domain/` (`applicationdomaintype.cpp`,
//! `mail.h`, `folder.h`, `event.h`): a tagged union over the known entity
//! types -- `mail`, `folder`, `event`, `account`, `identity`, `resource` --
//! replacing the original's template-specialized `TypeImplementation<T>`
//! factory. Each variant wraps a [`PropertyBag`], the Rust equivalent of
//! `ApplicationDomainType`'s `BufferAdaptor`: `get`/`set`/
//! `available_properties`/`changed_properties`, with change tracking so a
//! preprocessor can tell which properties a `modify` actually touched.

use std::collections::{HashMap, HashSet};

use crate::index::type_index::{Adaptor, PropertyValue};

/// A property-bag entity snapshot: `get`/`set`/`available_properties` plus
/// change tracking, independent of entity type.
#[derive(Clone, Debug, Default)]
pub struct PropertyBag {
    properties: HashMap<String, PropertyValue>,
    changed: HashSet<String>,
}

impl PropertyBag {
    /// An empty bag with nothing set and nothing changed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `property` to `value`, recording it as changed.
    pub fn set(&mut self, property: impl Into<String>, value: PropertyValue) {
        let property = property.into();
        self.properties.insert(property.clone(), value);
        self.changed.insert(property);
    }

    /// Properties set since the bag was created or [`Self::clear_changes`]
    /// was last called.
    pub fn changed_properties(&self) -> Vec<String> {
        self.changed.iter().cloned().collect()
    }

    /// Resets the changed-properties set, e.g. after a successful write.
    pub fn clear_changes(&mut self) {
        self.changed.clear();
    }
}

impl Adaptor for PropertyBag {
    fn get(&self, property: &str) -> Option<PropertyValue> {
        self.properties.get(property).cloned()
    }

    fn available_properties(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

/// The declared entity types (spec.md §9 redesign note), each carrying its
/// own property bag.
#[derive(Clone, Debug)]
pub enum Entity {
    /// A single email message.
    Mail(PropertyBag),
    /// A mail folder / collection.
    Folder(PropertyBag),
    /// A calendar event.
    Event(PropertyBag),
    /// An account grouping one or more resources.
    Account(PropertyBag),
    /// A sender/recipient identity (name + address).
    Identity(PropertyBag),
    /// A resource instance's configuration, as its own entity
    /// (`original_source/common/resourceconfig.cpp`).
    Resource(PropertyBag),
}

impl Entity {
    /// The entity type name as stored in the revision log and table names
    /// (`"mail"`, `"folder"`, ...).
    pub fn entity_type(&self) -> &'static str {
        match self {
            Entity::Mail(_) => "mail",
            Entity::Folder(_) => "folder",
            Entity::Event(_) => "event",
            Entity::Account(_) => "account",
            Entity::Identity(_) => "identity",
            Entity::Resource(_) => "resource",
        }
    }

    /// The wrapped property bag, regardless of variant.
    pub fn bag(&self) -> &PropertyBag {
        match self {
            Entity::Mail(b)
            | Entity::Folder(b)
            | Entity::Event(b)
            | Entity::Account(b)
            | Entity::Identity(b)
            | Entity::Resource(b) => b,
        }
    }

    /// Mutable access to the wrapped property bag.
    pub fn bag_mut(&mut self) -> &mut PropertyBag {
        match self {
            Entity::Mail(b)
            | Entity::Folder(b)
            | Entity::Event(b)
            | Entity::Account(b)
            | Entity::Identity(b)
            | Entity::Resource(b) => b,
        }
    }
}

impl Adaptor for Entity {
    fn get(&self, property: &str) -> Option<PropertyValue> {
        self.bag().get(property)
    }

    fn available_properties(&self) -> Vec<String> {
        self.bag().available_properties()
    }
}

/// Declares a `mail` type index matching
/// `original_source/common/domain/mail.h`'s `configure(TypeIndex&)`:
/// indexed by `folder` (sorted by `date`), `sender`, and `messageId`.
pub fn mail_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("mail");
    index.add_sorted_property("folder", "date");
    index.add_property("sender");
    index.add_property("messageId");
    index
}

/// Declares a `folder` type index: indexed by `parent` and `name`.
pub fn folder_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("folder");
    index.add_property("parent");
    index.add_property("name");
    index
}

/// Declares an `event` type index matching `event.cpp`'s `getIndex()`:
/// indexed by `uid`.
pub fn event_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("event");
    index.add_property("uid");
    index
}

/// Declares an `account` type index: indexed by `name`.
pub fn account_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("account");
    index.add_property("name");
    index
}

/// Declares an `identity` type index: indexed by `address`.
pub fn identity_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("identity");
    index.add_property("address");
    index
}

/// Declares a `resource` type index: indexed by `account` (the owning
/// account's identifier, as a reference property).
pub fn resource_type_index() -> crate::index::TypeIndex {
    let mut index = crate::index::TypeIndex::new("resource");
    index.add_property("account");
    index
}

/// Builds a `resource` entity for a `maildir`-style resource, mirroring
/// `original_source/common/domain/applicationdomaintype.cpp`'s
/// `MaildirResource::create`.
pub fn maildir_resource(account: PropertyValue) -> Entity {
    let mut bag = PropertyBag::new();
    bag.set("type", PropertyValue::Text("org.kde.maildir".into()));
    bag.set("account", account);
    bag.clear_changes();
    Entity::Resource(bag)
}

/// Builds a `resource` entity for an `imap`-style resource, mirroring
/// `ImapResource::create`.
pub fn imap_resource(account: PropertyValue) -> Entity {
    let mut bag = PropertyBag::new();
    bag.set("type", PropertyValue::Text("org.kde.imap".into()));
    bag.set("account", account);
    bag.clear_changes();
    Entity::Resource(bag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bag_tracks_only_the_last_set_of_changes() {
        let mut bag = PropertyBag::new();
        bag.set("subject", PropertyValue::Text("hello".into()));
        bag.set("folder", PropertyValue::Text("inbox".into()));
        let mut changed = bag.changed_properties();
        changed.sort();
        assert_eq!(changed, vec!["folder".to_string(), "subject".to_string()]);

        bag.clear_changes();
        assert!(bag.changed_properties().is_empty());
        bag.set("subject", PropertyValue::Text("updated".into()));
        assert_eq!(bag.changed_properties(), vec!["subject".to_string()]);
    }

    #[test]
    fn entity_type_reports_the_declared_name() {
        let mail = Entity::Mail(PropertyBag::new());
        assert_eq!(mail.entity_type(), "mail");
        let folder = Entity::Folder(PropertyBag::new());
        assert_eq!(folder.entity_type(), "folder");
    }

    #[test]
    fn adaptor_impl_delegates_to_the_wrapped_bag() {
        let mut bag = PropertyBag::new();
        bag.set("uid", PropertyValue::Text("abc123".into()));
        let event = Entity::Event(bag);
        assert_eq!(event.get("uid"), Some(PropertyValue::Text("abc123".into())));
        assert_eq!(event.available_properties(), vec!["uid".to_string()]);
    }

    #[test]
    fn maildir_resource_has_no_pending_changes_after_construction() {
        let resource = maildir_resource(PropertyValue::Text("account-1".into()));
        assert!(resource.bag().changed_properties().is_empty());
        assert_eq!(resource.get("type"), Some(PropertyValue::Text("org.kde.maildir".into())));
    }
}
