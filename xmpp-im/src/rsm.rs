// Copyright (c) 2017 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! [XEP-0059: Result Set Management](https://xmpp.org/extensions/xep-0059.html)
//!
//! A [`ResultSetProvider`] exposes an ordered collection of items by index
//! or by item id, and [`SetQuery::apply`] answers a paging request against
//! it.

use core::fmt;
use core::str::FromStr;
use std::sync::{Arc, RwLock};

use xmpp_session::minidom::Element;
use xmpp_session::stanza_error::{DefinedCondition, ErrorType, StanzaError};

/// `http://jabber.org/protocol/rsm`
pub const NS: &str = "http://jabber.org/protocol/rsm";

/// Something with an id that is stable across pages.
pub trait ResultSetItem: Clone + Send + Sync {
    /// The id of this item, unique within its set.
    fn item_id(&self) -> &str;
}

impl ResultSetItem for String {
    fn item_id(&self) -> &str {
        self
    }
}

/// An ordered collection of items that can be paged through.
///
/// Out of bounds requests give fewer or no items, they never panic.
pub trait ResultSetProvider<T: ResultSetItem>: Send + Sync {
    /// Every item, in order.
    fn all_items(&self) -> Vec<T>;

    /// How many items there are.
    fn count(&self) -> usize;

    /// The `max` items starting at `start`.
    ///
    /// Empty unless the whole range lies within the set.
    fn items_in_range(&self, start: usize, max: usize) -> Vec<T>;

    /// The position of the item called `id`.
    fn index_of(&self, id: &str) -> Option<usize>;

    /// Up to `max` items following the item called `id`, empty if there is
    /// no such item.
    fn items_after(&self, id: &str, max: usize) -> Vec<T> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let start = index + 1;
        let available = self.count().saturating_sub(start);
        self.items_in_range(start, max.min(available))
    }

    /// Up to `max` items preceding the item called `id`, empty if there is
    /// no such item.
    fn items_before(&self, id: &str, max: usize) -> Vec<T> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let start = index.saturating_sub(max);
        self.items_in_range(start, index - start)
    }
}

fn range_is_valid(start: usize, max: usize, count: usize) -> bool {
    match start.checked_add(max) {
        Some(end) => end <= count,
        None => false,
    }
}

/// Items kept in memory, shared with whoever fills them.
///
/// Every call works on the content at the time of the call.
#[derive(Debug)]
pub struct InMemoryProvider<T> {
    items: Arc<RwLock<Vec<T>>>,
}

impl<T> Clone for InMemoryProvider<T> {
    fn clone(&self) -> Self {
        InMemoryProvider {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: ResultSetItem> InMemoryProvider<T> {
    /// Serve `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self::shared(Arc::new(RwLock::new(items)))
    }

    /// Serve the content of `items`, which may keep changing.
    pub fn shared(items: Arc<RwLock<Vec<T>>>) -> Self {
        InMemoryProvider { items }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }

    fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        f(&items)
    }
}

impl<T: ResultSetItem> ResultSetProvider<T> for InMemoryProvider<T> {
    fn all_items(&self) -> Vec<T> {
        self.read(<[T]>::to_vec)
    }

    fn count(&self) -> usize {
        self.read(<[T]>::len)
    }

    fn items_in_range(&self, start: usize, max: usize) -> Vec<T> {
        self.read(|items| {
            if !range_is_valid(start, max, items.len()) {
                return Vec::new();
            }
            items[start..start + max].to_vec()
        })
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.read(|items| items.iter().position(|item| item.item_id() == id))
    }
}

/// Several providers seen as their concatenation.
pub struct CombinedProvider<T> {
    providers: Vec<Arc<dyn ResultSetProvider<T>>>,
}

impl<T> fmt::Debug for CombinedProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CombinedProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl<T: ResultSetItem> CombinedProvider<T> {
    /// Concatenate `providers`, in order.
    pub fn new(providers: Vec<Arc<dyn ResultSetProvider<T>>>) -> Self {
        CombinedProvider { providers }
    }
}

impl<T: ResultSetItem> ResultSetProvider<T> for CombinedProvider<T> {
    fn all_items(&self) -> Vec<T> {
        self.providers
            .iter()
            .flat_map(|provider| provider.all_items())
            .collect()
    }

    fn count(&self) -> usize {
        self.providers.iter().map(|provider| provider.count()).sum()
    }

    fn items_in_range(&self, start: usize, max: usize) -> Vec<T> {
        if !range_is_valid(start, max, self.count()) {
            return Vec::new();
        }
        let mut items = Vec::with_capacity(max);
        let mut offset = 0;
        for provider in &self.providers {
            if items.len() == max {
                break;
            }
            let count = provider.count();
            let wanted_start = start + items.len();
            if wanted_start < offset + count {
                let local_start = wanted_start - offset;
                let local_max = (max - items.len()).min(count - local_start);
                items.extend(provider.items_in_range(local_start, local_max));
            }
            offset += count;
        }
        items
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        let mut offset = 0;
        for provider in &self.providers {
            if let Some(index) = provider.index_of(id) {
                return Some(offset + index);
            }
            offset += provider.count();
        }
        None
    }
}

/// A paging request which can not be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsmError {
    /// The `<set/>` element is malformed.
    BadRequest(String),

    /// `after` or `before` names an item which is not in the set.
    ItemNotFound(String),
}

impl fmt::Display for RsmError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RsmError::BadRequest(e) => write!(fmt, "bad result set request: {}", e),
            RsmError::ItemNotFound(id) => write!(fmt, "no item with id {:?} in the result set", id),
        }
    }
}

impl std::error::Error for RsmError {}

impl RsmError {
    /// The error to answer the request with.
    pub fn to_stanza_error(&self) -> StanzaError {
        let text = self.to_string();
        match self {
            RsmError::BadRequest(_) => {
                StanzaError::new(ErrorType::Modify, DefinedCondition::BadRequest, Some(text.as_str()))
            }
            RsmError::ItemNotFound(_) => {
                StanzaError::new(ErrorType::Cancel, DefinedCondition::ItemNotFound, Some(text.as_str()))
            }
        }
    }
}

fn child_text(element: &Element, name: &str) -> Result<Option<String>, RsmError> {
    let mut children = element.children().filter(|child| child.is(name, NS));
    let Some(child) = children.next() else {
        return Ok(None);
    };
    if children.next().is_some() {
        return Err(RsmError::BadRequest(format!("more than one <{}/>", name)));
    }
    Ok(Some(child.text()))
}

fn parse_number<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>, RsmError> {
    value
        .map(|text| {
            text.trim()
                .parse()
                .map_err(|_| RsmError::BadRequest(format!("<{}/> is not a number: {:?}", name, text)))
        })
        .transpose()
}

fn check_set(element: &Element) -> Result<(), RsmError> {
    if !element.is("set", NS) {
        return Err(RsmError::BadRequest(format!(
            "expected {{{}}}set, got {{{}}}{}",
            NS,
            element.ns(),
            element.name()
        )));
    }
    Ok(())
}

fn text_child(name: &str, text: impl Into<String>) -> Element {
    Element::builder(name, NS).append(text.into()).build()
}

/// Requests paging through a potentially big set of items (represented by an
/// UID).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetQuery {
    /// Limit the number of items, or use the recipient’s defaults if None.
    pub max: Option<usize>,

    /// The UID after which to give results, or if None it is the element
    /// “before” the first item, effectively an index of negative one.
    pub after: Option<String>,

    /// The UID before which to give results. An empty string asks for the
    /// last page of the full set.
    pub before: Option<String>,

    /// Numerical index of the page (deprecated).
    pub index: Option<usize>,
}

/// The first item of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct First {
    /// The position of the [first item](#structfield.item) in the full set
    /// (which may be approximate).
    pub index: Option<usize>,

    /// The UID of the first item of the page.
    pub item: String,
}

/// Describes the paging result of a [query](struct.SetQuery.html).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetResult {
    /// The first item of the page.
    pub first: Option<First>,

    /// The UID of the last item of the page.
    pub last: Option<String>,

    /// How many items there are in the full set (which may be approximate).
    pub count: Option<usize>,
}

impl SetQuery {
    /// Parse a `<set/>` request.
    pub fn parse(element: &Element) -> Result<SetQuery, RsmError> {
        check_set(element)?;
        let query = SetQuery {
            max: parse_number("max", child_text(element, "max")?)?,
            after: child_text(element, "after")?,
            before: child_text(element, "before")?,
            index: parse_number("index", child_text(element, "index")?)?,
        };
        if query.after.is_some() && query.before.is_some() {
            return Err(RsmError::BadRequest(
                "<after/> and <before/> are mutually exclusive".to_owned(),
            ));
        }
        Ok(query)
    }

    /// Serialise this request.
    pub fn to_element(&self) -> Element {
        let mut set = Element::builder("set", NS);
        if let Some(max) = self.max {
            set = set.append(text_child("max", max.to_string()));
        }
        if let Some(after) = &self.after {
            set = set.append(text_child("after", after.as_str()));
        }
        if let Some(before) = &self.before {
            set = set.append(text_child("before", before.as_str()));
        }
        if let Some(index) = self.index {
            set = set.append(text_child("index", index.to_string()));
        }
        set.build()
    }

    /// Answer this request from `provider`.
    ///
    /// Without `max` the page runs to the end of the set, and `max` of 0
    /// only reports the count.
    pub fn apply<T: ResultSetItem>(
        &self,
        provider: &dyn ResultSetProvider<T>,
    ) -> Result<(Vec<T>, SetResult), RsmError> {
        let count = provider.count();
        let max = self.max.unwrap_or(count);

        let items = match (&self.after, &self.before, self.index) {
            (Some(after), _, _) => {
                if provider.index_of(after).is_none() {
                    return Err(RsmError::ItemNotFound(after.clone()));
                }
                provider.items_after(after, max)
            }
            (None, Some(before), _) if before.is_empty() => {
                let max = max.min(count);
                provider.items_in_range(count - max, max)
            }
            (None, Some(before), _) => {
                if provider.index_of(before).is_none() {
                    return Err(RsmError::ItemNotFound(before.clone()));
                }
                provider.items_before(before, max)
            }
            (None, None, index) => {
                let start = index.unwrap_or(0).min(count);
                provider.items_in_range(start, max.min(count - start))
            }
        };

        let first = items.first().map(|item| First {
            index: provider.index_of(item.item_id()),
            item: item.item_id().to_owned(),
        });
        let result = SetResult {
            first,
            last: items.last().map(|item| item.item_id().to_owned()),
            count: Some(count),
        };
        Ok((items, result))
    }
}

impl SetResult {
    /// Parse a `<set/>` answer.
    pub fn parse(element: &Element) -> Result<SetResult, RsmError> {
        check_set(element)?;
        let mut firsts = element.children().filter(|child| child.is("first", NS));
        let first = match firsts.next() {
            Some(first) => Some(First {
                index: parse_number("index", first.attr("index").map(str::to_owned))?,
                item: first.text(),
            }),
            None => None,
        };
        if firsts.next().is_some() {
            return Err(RsmError::BadRequest("more than one <first/>".to_owned()));
        }
        Ok(SetResult {
            first,
            last: child_text(element, "last")?,
            count: parse_number("count", child_text(element, "count")?)?,
        })
    }

    /// Serialise this answer.
    pub fn to_element(&self) -> Element {
        let mut set = Element::builder("set", NS);
        if let Some(first) = &self.first {
            set = set.append(
                Element::builder("first", NS)
                    .attr("index", first.index.map(|index| index.to_string()))
                    .append(first.item.as_str())
                    .build(),
            );
        }
        if let Some(last) = &self.last {
            set = set.append(text_child("last", last.as_str()));
        }
        if let Some(count) = self.count {
            set = set.append(text_child("count", count.to_string()));
        }
        set.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> InMemoryProvider<String> {
        InMemoryProvider::new(ids.iter().map(|id| id.to_string()).collect())
    }

    fn shared(ids: &[&str]) -> Arc<dyn ResultSetProvider<String>> {
        Arc::new(items(ids))
    }

    fn combined() -> CombinedProvider<String> {
        CombinedProvider::new(vec![shared(&["a", "b", "c"]), shared(&["d", "e"])])
    }

    #[test]
    fn range_out_of_bounds_is_empty() {
        let provider = items(&["a", "b", "c"]);
        assert_eq!(provider.items_in_range(1, 2), ["b", "c"]);
        assert!(provider.items_in_range(2, 2).is_empty());
        assert!(provider.items_in_range(4, 0).is_empty());
        assert!(provider.items_in_range(1, usize::MAX).is_empty());
        assert!(provider.items_in_range(usize::MAX, 2).is_empty());
        assert!(provider.items_in_range(3, 0).is_empty());
    }

    #[test]
    fn before_clamps_to_start() {
        let provider = items(&["a", "b", "c", "d"]);
        assert_eq!(provider.items_before("c", 10), ["a", "b"]);
        assert_eq!(provider.items_before("c", 1), ["b"]);
        assert!(provider.items_before("a", 3).is_empty());
        assert!(provider.items_before("z", 3).is_empty());
    }

    #[test]
    fn after_stops_at_end() {
        let provider = items(&["a", "b", "c", "d"]);
        assert_eq!(provider.items_after("b", 10), ["c", "d"]);
        assert_eq!(provider.items_after("a", 2), ["b", "c"]);
        assert!(provider.items_after("d", 2).is_empty());
        assert!(provider.items_after("z", 2).is_empty());
    }

    #[test]
    fn index_of_missing_item() {
        assert_eq!(items(&["a"]).index_of("b"), None);
        assert_eq!(combined().index_of("z"), None);
    }

    #[test]
    fn in_memory_sees_later_changes() {
        let backing = Arc::new(RwLock::new(vec!["a".to_owned()]));
        let provider = InMemoryProvider::shared(Arc::clone(&backing));
        backing.write().unwrap().push("b".to_owned());
        provider.push("c".to_owned());
        assert_eq!(provider.all_items(), ["a", "b", "c"]);
        assert_eq!(provider.index_of("c"), Some(2));
    }

    #[test]
    fn combined_offsets_span_providers() {
        let provider = combined();
        assert_eq!(provider.count(), 5);
        assert_eq!(provider.index_of("b"), Some(1));
        assert_eq!(provider.index_of("e"), Some(3 + 1));
        assert_eq!(provider.all_items(), ["a", "b", "c", "d", "e"]);
        assert_eq!(provider.items_in_range(2, 2), ["c", "d"]);
        assert_eq!(provider.items_in_range(3, 2), ["d", "e"]);
        assert!(provider.items_in_range(4, 2).is_empty());
        assert_eq!(provider.items_after("b", 3), ["c", "d", "e"]);
        assert_eq!(provider.items_before("e", 2), ["c", "d"]);
    }

    #[test]
    fn combined_with_empty_provider() {
        let provider = CombinedProvider::new(vec![
            shared(&[]),
            shared(&["a", "b"]),
            shared(&[]),
            shared(&["c"]),
        ]);
        assert_eq!(provider.index_of("c"), Some(2));
        assert_eq!(provider.items_in_range(0, 3), ["a", "b", "c"]);
    }

    #[test]
    fn parse_query() {
        let elem: Element = "<set xmlns='http://jabber.org/protocol/rsm'><max>10</max><after>coucou</after></set>"
            .parse()
            .unwrap();
        let query = SetQuery::parse(&elem).unwrap();
        assert_eq!(query.max, Some(10));
        assert_eq!(query.after.as_deref(), Some("coucou"));
        assert_eq!(query.before, None);
        assert_eq!(SetQuery::parse(&query.to_element()).unwrap(), query);

        let elem: Element = "<set xmlns='http://jabber.org/protocol/rsm'/>".parse().unwrap();
        assert_eq!(SetQuery::parse(&elem).unwrap(), SetQuery::default());
    }

    #[test]
    fn invalid_queries() {
        let elem: Element = "<replace xmlns='urn:xmpp:message-correct:0'/>".parse().unwrap();
        assert!(matches!(SetQuery::parse(&elem), Err(RsmError::BadRequest(_))));

        let elem: Element = "<set xmlns='http://jabber.org/protocol/rsm'><max>ten</max></set>"
            .parse()
            .unwrap();
        assert!(matches!(SetQuery::parse(&elem), Err(RsmError::BadRequest(_))));

        let elem: Element = "<set xmlns='http://jabber.org/protocol/rsm'><after>a</after><before>b</before></set>"
            .parse()
            .unwrap();
        assert!(matches!(SetQuery::parse(&elem), Err(RsmError::BadRequest(_))));
    }

    #[test]
    fn parse_result() {
        let elem: Element = "<set xmlns='http://jabber.org/protocol/rsm'><first index='4'>coucou</first><last>d</last><count>10</count></set>"
            .parse()
            .unwrap();
        let result = SetResult::parse(&elem).unwrap();
        let first = result.first.clone().unwrap();
        assert_eq!(first.index, Some(4));
        assert_eq!(first.item, "coucou");
        assert_eq!(result.last.as_deref(), Some("d"));
        assert_eq!(result.count, Some(10));
        assert_eq!(SetResult::parse(&result.to_element()).unwrap(), result);
    }

    #[test]
    fn pages_through_combined_set() {
        let provider = combined();
        let query = SetQuery {
            max: Some(2),
            ..SetQuery::default()
        };
        let (page, result) = query.apply(&provider).unwrap();
        assert_eq!(page, ["a", "b"]);
        assert_eq!(result.last.as_deref(), Some("b"));
        assert_eq!(result.count, Some(5));

        let query = SetQuery {
            max: Some(2),
            after: result.last,
            ..SetQuery::default()
        };
        let (page, result) = query.apply(&provider).unwrap();
        assert_eq!(page, ["c", "d"]);
        assert_eq!(
            result.first,
            Some(First {
                index: Some(2),
                item: "c".to_owned()
            })
        );

        let query = SetQuery {
            max: Some(2),
            before: Some(String::new()),
            ..SetQuery::default()
        };
        let (page, _) = query.apply(&provider).unwrap();
        assert_eq!(page, ["d", "e"]);

        let query = SetQuery {
            max: Some(10),
            before: Some("c".to_owned()),
            ..SetQuery::default()
        };
        let (page, _) = query.apply(&provider).unwrap();
        assert_eq!(page, ["a", "b"]);
    }

    #[test]
    fn count_only_and_missing_items() {
        let provider = combined();
        let query = SetQuery {
            max: Some(0),
            ..SetQuery::default()
        };
        let (page, result) = query.apply(&provider).unwrap();
        assert!(page.is_empty());
        assert_eq!(result.first, None);
        assert_eq!(result.count, Some(5));

        let query = SetQuery {
            index: Some(7),
            ..SetQuery::default()
        };
        let (page, _) = query.apply(&provider).unwrap();
        assert!(page.is_empty());

        let query = SetQuery {
            after: Some("z".to_owned()),
            ..SetQuery::default()
        };
        let error = query.apply(&provider).unwrap_err();
        assert_eq!(error, RsmError::ItemNotFound("z".to_owned()));
        assert_eq!(
            error.to_stanza_error().defined_condition,
            DefinedCondition::ItemNotFound
        );
    }
}
