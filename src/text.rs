//! Rendering and mark-range queries over a text sequence (§4.5).
//!
//! Text reuses [`crate::object::ListObject`] (a position per unicode
//! scalar); this module adds the string-rendering and mark-coverage queries
//! that are specific to treating that list as text.

use crate::id::ElemId;
use crate::object::{ListObject, Value};
use crate::value::{Expand, ScalarValue};

/// Renders the live contents of a text object, ignoring tombstones.
pub fn render(list: &ListObject) -> String {
    let mut out = String::new();
    for elem in list.live_order() {
        if let Some((_, Value::Scalar(ScalarValue::Str(s)))) = list.winner(elem) {
            out.push_str(s);
        }
    }
    out
}

fn index_of(list: &ListObject, elem: ElemId) -> Option<usize> {
    if elem == ElemId::Head {
        return Some(usize::MAX); // sentinel: "before everything"
    }
    list.order.iter().position(|e| *e == elem)
}

/// The marks active at a live position, keeping only the highest-opid entry
/// per mark name when ranges with the same name overlap (§4.5).
pub fn marks_at<'a>(list: &'a ListObject, elem: ElemId) -> Vec<&'a crate::value::MarkData> {
    let Some(idx) = index_of(list, elem) else { return Vec::new() };
    let mut best: std::collections::HashMap<&str, (&crate::id::OpId, &crate::value::MarkData)> =
        std::collections::HashMap::new();
    for mark in &list.marks {
        let start_idx = index_of(list, mark.start).unwrap_or(0);
        let Some(end_idx) = index_of(list, mark.end) else { continue };
        if start_idx <= idx && idx <= end_idx {
            best.entry(mark.data.name.as_str())
                .and_modify(|(id, data)| {
                    if mark.id > **id {
                        *id = &mark.id;
                        *data = &mark.data;
                    }
                })
                .or_insert((&mark.id, &mark.data));
        }
    }
    best.into_values().map(|(_, data)| data).collect()
}

/// Whether an insertion exactly at `after` (i.e. immediately following that
/// element) should inherit a given mark, per its `expand` policy.
pub fn inherits_on_insert_after(list: &ListObject, after: ElemId, mark_name: &str) -> Option<ScalarValue> {
    for mark in list.marks.iter().rev() {
        if mark.data.name != mark_name {
            continue;
        }
        if mark.end == after && mark.data.expand.expands_after() {
            return Some(mark.data.value.clone());
        }
        if mark.start == after && mark.data.expand.expands_before() {
            return Some(mark.data.value.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ActorId, OpId};
    use crate::object::{ConflictSet, ResolvedMark};

    fn push_char(list: &mut ListObject, id: OpId, after: ElemId, ch: char) -> ElemId {
        let idx = list.insertion_index(after, id);
        let elem = ElemId::Op(id);
        list.order.insert(idx, elem);
        let mut set = ConflictSet::new();
        set.insert(id, Value::Scalar(ScalarValue::Str(ch.to_string())));
        list.slots.insert(elem, set);
        elem
    }

    #[test]
    fn renders_live_characters_in_order() {
        let actor = ActorId::new([1; 16]);
        let mut list = ListObject::default();
        let e0 = push_char(&mut list, OpId::new(1, actor), ElemId::Head, 'H');
        let e1 = push_char(&mut list, OpId::new(2, actor), e0, 'i');
        assert_eq!(render(&list), "Hi");
        list.slots.get_mut(&e1).unwrap().clear();
        assert_eq!(render(&list), "H");
    }

    #[test]
    fn bold_mark_covers_its_range() {
        let actor = ActorId::new([1; 16]);
        let mut list = ListObject::default();
        let e0 = push_char(&mut list, OpId::new(1, actor), ElemId::Head, 'a');
        let e1 = push_char(&mut list, OpId::new(2, actor), e0, 'b');
        let _e2 = push_char(&mut list, OpId::new(3, actor), e1, 'c');
        list.marks.push(ResolvedMark {
            id: OpId::new(4, actor),
            start: e0,
            end: e1,
            data: crate::value::MarkData {
                name: "bold".into(),
                value: ScalarValue::Bool(true),
                expand: Expand::After,
            },
        });
        assert_eq!(marks_at(&list, e0).len(), 1);
        assert_eq!(marks_at(&list, e1).len(), 1);
        assert!(marks_at(&list, _e2).is_empty());
    }
}
