//! List values: sets of named flags grouped by origin list
//!
//! A story declares its lists once (`LIST colors = red, yellow, white`). The
//! definitions live in [`ListDefinitions`], shared by every list value created
//! from the same story so flags can be resolved and ordered by value.

use crate::error::{InkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// Identifies one flag: the list it belongs to and its position inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListItemId {
    pub list: u16,
    pub flag: u16,
}

/// One declared list (origin) and its flags sorted by value.
#[derive(Debug, Clone, PartialEq)]
pub struct ListDefinition {
    pub name: String,
    pub flags: Vec<(String, i32)>,
}

/// All list declarations of a story.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListDefinitions {
    lists: Vec<ListDefinition>,
}

impl ListDefinitions {
    pub fn new(mut lists: Vec<ListDefinition>) -> Self {
        for list in &mut lists {
            list.flags.sort_by_key(|(_, value)| *value);
        }
        Self { lists }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListDefinition> {
        self.lists.iter()
    }

    pub fn list(&self, index: u16) -> Option<&ListDefinition> {
        self.lists.get(index as usize)
    }

    pub fn list_index(&self, name: &str) -> Option<u16> {
        self.lists
            .iter()
            .position(|list| list.name == name)
            .map(|index| index as u16)
    }

    pub fn flag_name(&self, item: ListItemId) -> Option<&str> {
        self.list(item.list)
            .and_then(|list| list.flags.get(item.flag as usize))
            .map(|(name, _)| name.as_str())
    }

    pub fn flag_value(&self, item: ListItemId) -> Option<i32> {
        self.list(item.list)
            .and_then(|list| list.flags.get(item.flag as usize))
            .map(|(_, value)| *value)
    }

    /// Finds the flag with `value` inside `list`.
    pub fn flag_by_value(&self, list: u16, value: i32) -> Option<ListItemId> {
        self.list(list)?
            .flags
            .iter()
            .position(|(_, v)| *v == value)
            .map(|flag| ListItemId {
                list,
                flag: flag as u16,
            })
    }

    /// Resolves `"list.flag"` or a bare `"flag"`. Bare names prefer `preferred`
    /// origins, then fall back to the first declaring list.
    pub fn resolve(&self, name: &str, preferred: &BTreeSet<u16>) -> Option<ListItemId> {
        if let Some((list_name, flag_name)) = name.split_once('.') {
            let list = self.list_index(list_name)?;
            return self.find_in(list, flag_name);
        }
        preferred
            .iter()
            .find_map(|list| self.find_in(*list, name))
            .or_else(|| (0..self.lists.len() as u16).find_map(|list| self.find_in(list, name)))
    }

    fn find_in(&self, list: u16, flag_name: &str) -> Option<ListItemId> {
        self.list(list)?
            .flags
            .iter()
            .position(|(name, _)| name == flag_name)
            .map(|flag| ListItemId {
                list,
                flag: flag as u16,
            })
    }
}

/// A flag yielded when iterating a list value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flag<'a> {
    pub origin: &'a str,
    pub name: &'a str,
    pub value: i32,
}

/// A set of flags, possibly drawn from several origin lists.
#[derive(Clone)]
pub struct ListValue {
    defs: Rc<ListDefinitions>,
    items: BTreeSet<ListItemId>,
    origins: BTreeSet<u16>,
}

impl ListValue {
    pub fn empty(defs: Rc<ListDefinitions>) -> Self {
        Self {
            defs,
            items: BTreeSet::new(),
            origins: BTreeSet::new(),
        }
    }

    pub(crate) fn from_parts(
        defs: Rc<ListDefinitions>,
        items: impl IntoIterator<Item = ListItemId>,
        origins: impl IntoIterator<Item = u16>,
    ) -> Self {
        let items: BTreeSet<ListItemId> = items.into_iter().collect();
        let mut origins: BTreeSet<u16> = origins.into_iter().collect();
        origins.extend(items.iter().map(|item| item.list));
        Self {
            defs,
            items,
            origins,
        }
    }

    pub fn definitions(&self) -> &Rc<ListDefinitions> {
        &self.defs
    }

    pub(crate) fn items(&self) -> &BTreeSet<ListItemId> {
        &self.items
    }

    pub(crate) fn origins(&self) -> &BTreeSet<u16> {
        &self.origins
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.defs
            .resolve(flag, &self.origins)
            .is_some_and(|item| self.items.contains(&item))
    }

    pub fn add(&mut self, flag: &str) -> Result<()> {
        let item = self.lookup(flag)?;
        self.origins.insert(item.list);
        self.items.insert(item);
        Ok(())
    }

    pub fn remove(&mut self, flag: &str) -> Result<()> {
        let item = self.lookup(flag)?;
        self.items.remove(&item);
        Ok(())
    }

    fn lookup(&self, flag: &str) -> Result<ListItemId> {
        self.defs
            .resolve(flag, &self.origins)
            .ok_or_else(|| InkError::UnknownListFlag {
                flag: flag.to_string(),
            })
    }

    /// Flags in rendering order: by value, ties broken by origin name.
    pub fn flags(&self) -> Vec<Flag<'_>> {
        let mut flags: Vec<Flag<'_>> = self.items.iter().filter_map(|item| self.flag(*item)).collect();
        flags.sort_by(|a, b| a.value.cmp(&b.value).then_with(|| a.origin.cmp(b.origin)));
        flags
    }

    /// Flags whose origin list is named `origin`.
    pub fn flags_from(&self, origin: &str) -> Vec<Flag<'_>> {
        self.flags()
            .into_iter()
            .filter(|flag| flag.origin == origin)
            .collect()
    }

    fn flag(&self, item: ListItemId) -> Option<Flag<'_>> {
        let list = self.defs.list(item.list)?;
        let (name, value) = list.flags.get(item.flag as usize)?;
        Some(Flag {
            origin: &list.name,
            name,
            value: *value,
        })
    }

    fn value_of(&self, item: &ListItemId) -> i32 {
        self.defs.flag_value(*item).unwrap_or(0)
    }

    pub(crate) fn min_item(&self) -> Option<ListItemId> {
        self.items.iter().copied().min_by_key(|item| self.value_of(item))
    }

    pub(crate) fn max_item(&self) -> Option<ListItemId> {
        self.items.iter().copied().max_by_key(|item| self.value_of(item))
    }

    pub(crate) fn min_value(&self) -> Option<i32> {
        self.min_item().map(|item| self.value_of(&item))
    }

    pub(crate) fn max_value(&self) -> Option<i32> {
        self.max_item().map(|item| self.value_of(&item))
    }

    fn derive(&self, items: BTreeSet<ListItemId>) -> Self {
        Self {
            defs: Rc::clone(&self.defs),
            items,
            origins: self.origins.clone(),
        }
    }

    pub fn union(&self, other: &ListValue) -> Self {
        let mut result = self.derive(self.items.union(&other.items).copied().collect());
        result.origins.extend(other.origins.iter().copied());
        result
    }

    pub fn difference(&self, other: &ListValue) -> Self {
        self.derive(self.items.difference(&other.items).copied().collect())
    }

    pub fn intersection(&self, other: &ListValue) -> Self {
        self.derive(self.items.intersection(&other.items).copied().collect())
    }

    /// True when every flag of `other` is present. Empty operands never match.
    pub fn has_all(&self, other: &ListValue) -> bool {
        !self.items.is_empty()
            && !other.items.is_empty()
            && other.items.is_subset(&self.items)
    }

    /// Moves every flag `by` steps in value within its own origin.
    pub fn shift(&self, by: i32) -> Self {
        let items = self
            .items
            .iter()
            .filter_map(|item| {
                let value = self.defs.flag_value(*item)?.checked_add(by)?;
                self.defs.flag_by_value(item.list, value)
            })
            .collect();
        self.derive(items)
    }

    /// Every flag of every origin list.
    pub fn all(&self) -> Self {
        let items = self
            .origins
            .iter()
            .flat_map(|list| {
                let count = self.defs.list(*list).map_or(0, |def| def.flags.len());
                (0..count).map(move |flag| ListItemId {
                    list: *list,
                    flag: flag as u16,
                })
            })
            .collect();
        self.derive(items)
    }

    pub fn invert(&self) -> Self {
        self.all().difference(self)
    }

    pub fn single_min(&self) -> Self {
        self.derive(self.min_item().into_iter().collect())
    }

    pub fn single_max(&self) -> Self {
        self.derive(self.max_item().into_iter().collect())
    }

    /// Flags of the origins whose values fall in `min..=max`.
    pub fn range(&self, min: i32, max: i32) -> Self {
        let items = self
            .items
            .iter()
            .copied()
            .filter(|item| (min..=max).contains(&self.value_of(item)))
            .collect();
        self.derive(items)
    }

    /// Just `item`, keeping this list's origins.
    pub(crate) fn only(&self, item: ListItemId) -> Self {
        self.derive(BTreeSet::from([item]))
    }

    /// The flag with `value` inside the first origin that has one.
    pub fn item_with_value(&self, value: i32) -> Self {
        let item = self
            .origins
            .iter()
            .find_map(|list| self.defs.flag_by_value(*list, value));
        self.derive(item.into_iter().collect())
    }

    pub fn less_than(&self, other: &ListValue) -> bool {
        match (self.max_value(), other.min_value()) {
            (None, _) => true,
            (_, None) => false,
            (Some(max), Some(min)) => max < min,
        }
    }

    pub fn greater_than(&self, other: &ListValue) -> bool {
        match (self.min_value(), other.max_value()) {
            (None, _) => false,
            (_, None) => true,
            (Some(min), Some(max)) => min > max,
        }
    }

    pub fn greater_or_equal(&self, other: &ListValue) -> bool {
        match (self.min_value(), self.max_value(), other.min_value(), other.max_value()) {
            (None, ..) => false,
            (_, _, None, _) => true,
            (Some(a_min), Some(a_max), Some(b_min), Some(b_max)) => a_min >= b_min && a_max >= b_max,
            _ => false,
        }
    }

    pub fn less_or_equal(&self, other: &ListValue) -> bool {
        match (self.min_value(), self.max_value(), other.min_value(), other.max_value()) {
            (_, _, None, _) => false,
            (None, ..) => true,
            (Some(a_min), Some(a_max), Some(b_min), Some(b_max)) => a_max <= b_max && a_min <= b_min,
            _ => false,
        }
    }
}

impl PartialEq for ListValue {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Debug for ListValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.flags().iter().map(|flag| format!("{}.{}", flag.origin, flag.name)))
            .finish()
    }
}

impl fmt::Display for ListValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.flags().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(flag.name)?;
        }
        Ok(())
    }
}
