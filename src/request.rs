// RenderRequest and its entry log.
//
// A RenderRequest is one decoded batch of ordered view-tree mutation
// instructions destined for one context. It is created by the decoder,
// handed to the context's render queue, consumed exactly once, and then
// discarded together with everything it owns (strings, cached attached
// values, callback handles).

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::error::DecodeResult;
use crate::value::{AttachedValueTable, CallbackHandle, HostValue};

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of one logical UI tree instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one element (view node) inside a context's tree.
///
/// Only the low 24 bits are meaningful: the wire format packs the id into
/// the upper bits of the entry header word, next to the one-byte tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ElementId(pub u32);

impl ElementId {
    /// Extract the element id from an entry header word.
    pub fn from_header(header: u32) -> Self {
        ElementId(header >> 8)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Animation Options
// ============================================================================

/// Easing curve for an animation block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AnimationCurve {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl AnimationCurve {
    /// Maps the wire curve word to a curve. Unknown values fail the parse.
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(AnimationCurve::Linear),
            1 => Some(AnimationCurve::EaseIn),
            2 => Some(AnimationCurve::EaseOut),
            3 => Some(AnimationCurve::EaseInOut),
            _ => None,
        }
    }
}

/// Parameters of one animation block (`StartAnimations` entry).
#[derive(Clone, Debug)]
pub struct AnimationOptions {
    pub duration: f64,
    pub curve: AnimationCurve,
    pub begin_from_current_state: bool,
    pub crossfade: bool,
    pub stiffness: f64,
    pub damping: f64,
    pub control_points: Vec<f64>,
    /// Scripting-side completion callback, invoked when the animation group
    /// settles. Opaque to this core.
    pub completion: Option<HostValue>,
    /// Token a later `CancelAnimation` entry may use to cancel the group.
    pub cancel_token: u32,
}

// ============================================================================
// Entries
// ============================================================================

/// Payload of a `SetElementAttribute` entry.
#[derive(Clone, Debug)]
pub enum AttributeValue {
    Undefined,
    Null,
    Bool(bool),
    /// 32-bit wire integers are promoted to doubles at decode time.
    Double(f64),
    /// Indices into the request's attached-value table; resolved lazily on
    /// the applying thread.
    ValueArray(Vec<u32>),
    /// Precompiled style object, resolved from the style table at decode
    /// time.
    Style(HostValue),
    /// Single attached-value index, resolved lazily on the applying thread.
    ValueRef(u32),
}

/// One view-tree mutation instruction.
///
/// Entries are interpreted strictly in append order: a later entry observes
/// the effect of every earlier one (e.g. `MoveElementToParent` may reference
/// an id created earlier in the same request).
#[derive(Clone, Debug)]
pub enum Entry {
    CreateElement {
        element_id: ElementId,
        view_class_name: String,
    },
    DestroyElement {
        element_id: ElementId,
    },
    MoveElementToParent {
        element_id: ElementId,
        parent_element_id: ElementId,
        parent_index: u32,
    },
    SetRootElement {
        element_id: ElementId,
    },
    SetElementAttribute {
        element_id: ElementId,
        attribute_id: u32,
        injected_from_parent: bool,
        value: AttributeValue,
    },
    StartAnimations {
        options: AnimationOptions,
    },
    EndAnimations,
    CancelAnimation {
        token: u32,
    },
    OnLayoutComplete {
        callback: CallbackHandle,
    },
}

impl Entry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Entry::CreateElement { .. } => "CreateElement",
            Entry::DestroyElement { .. } => "DestroyElement",
            Entry::MoveElementToParent { .. } => "MoveElementToParent",
            Entry::SetRootElement { .. } => "SetRootElement",
            Entry::SetElementAttribute { .. } => "SetElementAttribute",
            Entry::StartAnimations { .. } => "StartAnimations",
            Entry::EndAnimations => "EndAnimations",
            Entry::CancelAnimation { .. } => "CancelAnimation",
            Entry::OnLayoutComplete { .. } => "OnLayoutComplete",
        }
    }

    /// The element this entry addresses, for the layout-significant kinds.
    pub fn element_id(&self) -> Option<ElementId> {
        match self {
            Entry::CreateElement { element_id, .. }
            | Entry::DestroyElement { element_id }
            | Entry::MoveElementToParent { element_id, .. }
            | Entry::SetRootElement { element_id }
            | Entry::SetElementAttribute { element_id, .. } => Some(*element_id),
            Entry::StartAnimations { .. }
            | Entry::EndAnimations
            | Entry::CancelAnimation { .. }
            | Entry::OnLayoutComplete { .. } => None,
        }
    }

    /// Inspectable form: an object with a `type` field naming the kind plus
    /// every kind-specific field. Used by tooling and logging, not by the
    /// hot path.
    pub fn to_json(&self, names: &dyn AttributeNameTable) -> JsonValue {
        match self {
            Entry::CreateElement {
                element_id,
                view_class_name,
            } => json!({
                "type": "CreateElement",
                "elementId": element_id.0,
                "viewClassName": view_class_name,
            }),
            Entry::DestroyElement { element_id } => json!({
                "type": "DestroyElement",
                "elementId": element_id.0,
            }),
            Entry::MoveElementToParent {
                element_id,
                parent_element_id,
                parent_index,
            } => json!({
                "type": "MoveElementToParent",
                "elementId": element_id.0,
                "parentElementId": parent_element_id.0,
                "parentIndex": parent_index,
            }),
            Entry::SetRootElement { element_id } => json!({
                "type": "SetRootElement",
                "elementId": element_id.0,
            }),
            Entry::SetElementAttribute {
                element_id,
                attribute_id,
                injected_from_parent,
                value,
            } => {
                let attribute = names
                    .name_of(*attribute_id)
                    .unwrap_or_else(|| format!("attr:{attribute_id}"));
                json!({
                    "type": "SetElementAttribute",
                    "elementId": element_id.0,
                    "attribute": attribute,
                    "injectedFromParent": injected_from_parent,
                    "value": attribute_value_json(value),
                })
            }
            Entry::StartAnimations { options } => json!({
                "type": "StartAnimations",
                "duration": options.duration,
                "curve": options.curve,
                "beginFromCurrentState": options.begin_from_current_state,
                "crossfade": options.crossfade,
                "stiffness": options.stiffness,
                "damping": options.damping,
                "controlPoints": options.control_points,
                "completion": options.completion.as_ref().map(HostValue::to_json),
                "cancelToken": options.cancel_token,
            }),
            Entry::EndAnimations => json!({ "type": "EndAnimations" }),
            Entry::CancelAnimation { token } => json!({
                "type": "CancelAnimation",
                "token": token,
            }),
            Entry::OnLayoutComplete { .. } => json!({
                "type": "OnLayoutComplete",
                "callback": "<callback>",
            }),
        }
    }
}

fn attribute_value_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Undefined => json!({ "valueType": "undefined" }),
        AttributeValue::Null => json!({ "valueType": "null" }),
        AttributeValue::Bool(b) => json!({ "valueType": "bool", "value": b }),
        AttributeValue::Double(d) => json!({ "valueType": "double", "value": d }),
        AttributeValue::ValueArray(indices) => json!({
            "valueType": "valueArray",
            "indices": indices,
        }),
        AttributeValue::Style(style) => json!({
            "valueType": "style",
            "value": style.to_json(),
        }),
        AttributeValue::ValueRef(index) => json!({
            "valueType": "valueRef",
            "index": index,
        }),
    }
}

/// Maps numeric attribute ids to human-readable names for serialization.
pub trait AttributeNameTable {
    fn name_of(&self, attribute_id: u32) -> Option<String>;
}

/// Fallback table that leaves attribute ids numeric.
pub struct NumericAttributeNames;

impl AttributeNameTable for NumericAttributeNames {
    fn name_of(&self, _attribute_id: u32) -> Option<String> {
        None
    }
}

// ============================================================================
// Entry Log
// ============================================================================

/// Ordered dispatch over the concrete entry kinds.
///
/// Default methods are no-ops so a visitor only overrides the kinds it
/// cares about.
pub trait EntryVisitor {
    fn create_element(&mut self, _element_id: ElementId, _view_class_name: &str) {}
    fn destroy_element(&mut self, _element_id: ElementId) {}
    fn move_element_to_parent(
        &mut self,
        _element_id: ElementId,
        _parent_element_id: ElementId,
        _parent_index: u32,
    ) {
    }
    fn set_root_element(&mut self, _element_id: ElementId) {}
    fn set_element_attribute(
        &mut self,
        _element_id: ElementId,
        _attribute_id: u32,
        _injected_from_parent: bool,
        _value: &AttributeValue,
    ) {
    }
    fn start_animations(&mut self, _options: &AnimationOptions) {}
    fn end_animations(&mut self) {}
    fn cancel_animation(&mut self, _token: u32) {}
    fn on_layout_complete(&mut self, _callback: &CallbackHandle) {}
}

/// Append-only ordered log of the entries recorded for one request.
///
/// The compiler owns layout and destruction of the heterogeneous entry
/// records; what this wrapper preserves is the contract: entries keep their
/// append order, an already-appended entry is never mutated once a later
/// one exists, and visitation dispatches each entry to its concrete kind.
#[derive(Clone, Debug, Default)]
pub struct EntryLog {
    entries: Vec<Entry>,
}

impl EntryLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry at the end of the log and returns a handle for
    /// filling in fields, valid until the next append.
    pub fn append(&mut self, entry: Entry) -> &mut Entry {
        self.entries.push(entry);
        self.entries
            .last_mut()
            .unwrap_or_else(|| unreachable!("entry was just pushed"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Walks entries in append order, dispatching each to the visitor with
    /// its concrete kind.
    pub fn visit<V: EntryVisitor>(&self, visitor: &mut V) {
        for entry in &self.entries {
            match entry {
                Entry::CreateElement {
                    element_id,
                    view_class_name,
                } => visitor.create_element(*element_id, view_class_name),
                Entry::DestroyElement { element_id } => visitor.destroy_element(*element_id),
                Entry::MoveElementToParent {
                    element_id,
                    parent_element_id,
                    parent_index,
                } => visitor.move_element_to_parent(*element_id, *parent_element_id, *parent_index),
                Entry::SetRootElement { element_id } => visitor.set_root_element(*element_id),
                Entry::SetElementAttribute {
                    element_id,
                    attribute_id,
                    injected_from_parent,
                    value,
                } => visitor.set_element_attribute(
                    *element_id,
                    *attribute_id,
                    *injected_from_parent,
                    value,
                ),
                Entry::StartAnimations { options } => visitor.start_animations(options),
                Entry::EndAnimations => visitor.end_animations(),
                Entry::CancelAnimation { token } => visitor.cancel_animation(*token),
                Entry::OnLayoutComplete { callback } => visitor.on_layout_complete(callback),
            }
        }
    }
}

impl<'a> IntoIterator for &'a EntryLog {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ============================================================================
// Render Request
// ============================================================================

/// One decoded batch of ordered view-tree mutation instructions destined
/// for a single context.
pub struct RenderRequest {
    context_id: ContextId,
    entries: EntryLog,
    attached: AttachedValueTable,
    visibility_observer: Option<HostValue>,
    frame_observer: Option<HostValue>,
}

impl RenderRequest {
    pub fn new(
        context_id: ContextId,
        attached: AttachedValueTable,
        visibility_observer: Option<HostValue>,
        frame_observer: Option<HostValue>,
    ) -> Self {
        Self {
            context_id,
            entries: EntryLog::new(),
            attached,
            visibility_observer,
            frame_observer,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn entries(&self) -> &EntryLog {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut EntryLog {
        &mut self.entries
    }

    pub fn attached(&self) -> &AttachedValueTable {
        &self.attached
    }

    /// Resolves an attached value through the request's own table, so the
    /// decode-time and apply-time resolutions share one cache.
    pub fn resolve_attached(&self, index: u32) -> DecodeResult<&HostValue> {
        self.attached.resolve(index)
    }

    pub fn visibility_observer(&self) -> Option<&HostValue> {
        self.visibility_observer.as_ref()
    }

    pub fn frame_observer(&self) -> Option<&HostValue> {
        self.frame_observer.as_ref()
    }

    pub fn visit<V: EntryVisitor>(&self, visitor: &mut V) {
        self.entries.visit(visitor);
    }

    /// Inspectable form of the whole request, keyed by human-readable
    /// attribute names and type tags.
    pub fn serialize(&self, names: &dyn AttributeNameTable) -> JsonValue {
        let entries: Vec<JsonValue> = self.entries.iter().map(|e| e.to_json(names)).collect();
        json!({
            "contextId": self.context_id.0,
            "entries": entries,
            "attachedValues": self.attached.len(),
            "hasVisibilityObserver": self.visibility_observer.is_some(),
            "hasFrameObserver": self.frame_observer.is_some(),
        })
    }
}

impl fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRequest")
            .field("context_id", &self.context_id)
            .field("entries", &self.entries.len())
            .field("attached", &self.attached)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
