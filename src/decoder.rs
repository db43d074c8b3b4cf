// Wire-format decoder.
//
// The scripting runtime describes view-tree mutations as a stream of 32-bit
// little-endian words. Each entry starts with one header word whose low byte
// is the tag; for every tag that addresses a tree element the remaining 24
// bits carry the element id. Complex values are referenced by index into the
// attached-value table rather than inlined.
//
// Wire table (extra words beyond the header):
//   1  CreateElement        1: string-cache index
//   2  DestroyElement       0
//   3  SetRootElement       0
//   4  MoveElementToParent  2: parentId(&0xFFFFFF), parentIndex
//   5  SetAttr undefined    1: attrHeader
//   6  SetAttr null         1: attrHeader
//   7  SetAttr false        1: attrHeader
//   8  SetAttr true         1: attrHeader
//   9  SetAttr int          2: attrHeader, intValue
//  10  SetAttr double       3: attrHeader, loWord, hiWord
//  11  SetAttr array        2+N: attrHeader, length, N value-indices
//  12  SetAttr style ref    2: attrHeader, styleIndex
//  13  SetAttr value ref    2: attrHeader, valueIndex
//  14  StartAnimations      12: durLo, durHi, curve, beginFromCurrent,
//                               crossfade, stiffLo, stiffHi, dampLo, dampHi,
//                               controlPtsIdx, completionIdx, token
//  15  EndAnimations        0
//  16  OnLayoutComplete     1: callbackIdx
//  17  CancelAnimation      1: token
//
// attrHeader: low 24 bits = attributeId, bit 24 = injected-from-parent flag.

use crate::error::{DecodeError, DecodeResult};
use crate::request::{
    AnimationCurve, AnimationOptions, AttributeValue, ContextId, ElementId, Entry, RenderRequest,
};
use crate::value::{AttachedValueTable, HostValue};

const ELEMENT_ID_MASK: u32 = 0x00FF_FFFF;
const INJECTED_FLAG_SHIFT: u32 = 24;

// ============================================================================
// Wire Tags
// ============================================================================

/// Entry tags of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireTag {
    CreateElement = 1,
    DestroyElement = 2,
    SetRootElement = 3,
    MoveElementToParent = 4,
    AttrUndefined = 5,
    AttrNull = 6,
    AttrFalse = 7,
    AttrTrue = 8,
    AttrInt = 9,
    AttrDouble = 10,
    AttrValueArray = 11,
    AttrStyleRef = 12,
    AttrValueRef = 13,
    StartAnimations = 14,
    EndAnimations = 15,
    OnLayoutComplete = 16,
    CancelAnimation = 17,
}

impl WireTag {
    /// First tag that does not address a tree element; headers below it
    /// carry a 24-bit element id.
    pub const FIRST_TREE_FREE: u8 = WireTag::StartAnimations as u8;

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::CreateElement),
            2 => Some(Self::DestroyElement),
            3 => Some(Self::SetRootElement),
            4 => Some(Self::MoveElementToParent),
            5 => Some(Self::AttrUndefined),
            6 => Some(Self::AttrNull),
            7 => Some(Self::AttrFalse),
            8 => Some(Self::AttrTrue),
            9 => Some(Self::AttrInt),
            10 => Some(Self::AttrDouble),
            11 => Some(Self::AttrValueArray),
            12 => Some(Self::AttrStyleRef),
            13 => Some(Self::AttrValueRef),
            14 => Some(Self::StartAnimations),
            15 => Some(Self::EndAnimations),
            16 => Some(Self::OnLayoutComplete),
            17 => Some(Self::CancelAnimation),
            _ => None,
        }
    }
}

// ============================================================================
// Collaborator Lookups
// ============================================================================

/// Class-name lookup for `CreateElement` entries. Fails closed on a miss.
pub trait StringCache {
    fn lookup(&self, index: u32) -> Option<String>;
}

/// Precompiled style-attribute-table lookup.
pub trait StyleTable {
    fn style_at(&self, index: u32) -> Option<HostValue>;
}

/// Style table for contexts that precompile no styles.
pub struct EmptyStyleTable;

impl StyleTable for EmptyStyleTable {
    fn style_at(&self, _index: u32) -> Option<HostValue> {
        None
    }
}

// ============================================================================
// Word Cursor
// ============================================================================

/// Cursor over the wire word stream. Every read checks the remaining count
/// first; an under-run aborts the whole parse.
struct WordCursor<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.words.len()
    }

    fn next(&mut self, kind: &'static str) -> DecodeResult<u32> {
        match self.words.get(self.pos) {
            Some(word) => {
                self.pos += 1;
                Ok(*word)
            }
            None => Err(DecodeError::Truncated {
                kind,
                needed: 1,
                offset: self.pos,
            }),
        }
    }

    /// Doubles travel as two words, low half first.
    fn next_f64(&mut self, kind: &'static str) -> DecodeResult<f64> {
        let lo = self.next(kind)?;
        let hi = self.next(kind)?;
        Ok(f64::from_bits(((hi as u64) << 32) | lo as u64))
    }
}

// ============================================================================
// Descriptor Decoder
// ============================================================================

/// Decodes one wire payload into a `RenderRequest`.
///
/// The string cache and style table are collaborator lookups supplied by
/// the owning context; the attached-value table is moved into the produced
/// request so decode-time and apply-time resolutions share one cache.
pub struct DescriptorDecoder<'a> {
    strings: &'a dyn StringCache,
    styles: &'a dyn StyleTable,
}

impl<'a> DescriptorDecoder<'a> {
    pub fn new(strings: &'a dyn StringCache, styles: &'a dyn StyleTable) -> Self {
        Self { strings, styles }
    }

    /// Decodes `word_count` meaningful words of `words` into a request for
    /// `context_id`, or fails with a structural error.
    pub fn decode(
        &self,
        words: &[u32],
        word_count: usize,
        attached: AttachedValueTable,
        context_id: ContextId,
        visibility_observer: Option<HostValue>,
        frame_observer: Option<HostValue>,
    ) -> DecodeResult<RenderRequest> {
        let words = &words[..word_count.min(words.len())];
        let mut request =
            RenderRequest::new(context_id, attached, visibility_observer, frame_observer);
        let mut cursor = WordCursor::new(words);

        while !cursor.at_end() {
            let offset = cursor.pos;
            let header = cursor.next("header")?;
            let tag_byte = (header & 0xFF) as u8;
            let tag = WireTag::from_u8(tag_byte).ok_or(DecodeError::UnknownTag {
                tag: tag_byte,
                offset,
            })?;
            let element_id = ElementId::from_header(header);

            let entry = match tag {
                WireTag::CreateElement => {
                    let index = cursor.next("CreateElement")?;
                    let view_class_name = self
                        .strings
                        .lookup(index)
                        .ok_or(DecodeError::StringCacheMiss { index })?;
                    Entry::CreateElement {
                        element_id,
                        view_class_name,
                    }
                }
                WireTag::DestroyElement => Entry::DestroyElement { element_id },
                WireTag::SetRootElement => Entry::SetRootElement { element_id },
                WireTag::MoveElementToParent => {
                    let parent = cursor.next("MoveElementToParent")? & ELEMENT_ID_MASK;
                    let parent_index = cursor.next("MoveElementToParent")?;
                    Entry::MoveElementToParent {
                        element_id,
                        parent_element_id: ElementId(parent),
                        parent_index,
                    }
                }
                WireTag::AttrUndefined
                | WireTag::AttrNull
                | WireTag::AttrFalse
                | WireTag::AttrTrue
                | WireTag::AttrInt
                | WireTag::AttrDouble
                | WireTag::AttrValueArray
                | WireTag::AttrStyleRef
                | WireTag::AttrValueRef => {
                    self.decode_attribute(tag, element_id, &mut cursor, &request)?
                }
                WireTag::StartAnimations => {
                    let options = self.decode_animation_options(&mut cursor, &request)?;
                    Entry::StartAnimations { options }
                }
                WireTag::EndAnimations => Entry::EndAnimations,
                WireTag::OnLayoutComplete => {
                    let index = cursor.next("OnLayoutComplete")?;
                    let callback = request
                        .resolve_attached(index)?
                        .as_callback()
                        .cloned()
                        .ok_or(DecodeError::NotCallable { index })?;
                    Entry::OnLayoutComplete { callback }
                }
                WireTag::CancelAnimation => {
                    let token = cursor.next("CancelAnimation")?;
                    Entry::CancelAnimation { token }
                }
            };

            request.entries_mut().append(entry);
        }

        Ok(request)
    }

    fn decode_attribute(
        &self,
        tag: WireTag,
        element_id: ElementId,
        cursor: &mut WordCursor<'_>,
        request: &RenderRequest,
    ) -> DecodeResult<Entry> {
        let kind = "SetElementAttribute";
        let attr_header = cursor.next(kind)?;
        let attribute_id = attr_header & ELEMENT_ID_MASK;
        let injected_from_parent = (attr_header >> INJECTED_FLAG_SHIFT) != 0;

        let value = match tag {
            WireTag::AttrUndefined => AttributeValue::Undefined,
            WireTag::AttrNull => AttributeValue::Null,
            WireTag::AttrFalse => AttributeValue::Bool(false),
            WireTag::AttrTrue => AttributeValue::Bool(true),
            WireTag::AttrInt => {
                let raw = cursor.next(kind)?;
                AttributeValue::Double(raw as i32 as f64)
            }
            WireTag::AttrDouble => AttributeValue::Double(cursor.next_f64(kind)?),
            WireTag::AttrValueArray => {
                let length = cursor.next(kind)?;
                let mut indices = Vec::with_capacity(length as usize);
                for _ in 0..length {
                    let index = cursor.next(kind)?;
                    request.attached().check_index(index)?;
                    indices.push(index);
                }
                AttributeValue::ValueArray(indices)
            }
            WireTag::AttrStyleRef => {
                let index = cursor.next(kind)?;
                let style = self
                    .styles
                    .style_at(index)
                    .ok_or(DecodeError::StyleTableMiss { index })?;
                AttributeValue::Style(style)
            }
            WireTag::AttrValueRef => {
                let index = cursor.next(kind)?;
                request.attached().check_index(index)?;
                AttributeValue::ValueRef(index)
            }
            _ => unreachable!("non-attribute tag dispatched to decode_attribute"),
        };

        Ok(Entry::SetElementAttribute {
            element_id,
            attribute_id,
            injected_from_parent,
            value,
        })
    }

    fn decode_animation_options(
        &self,
        cursor: &mut WordCursor<'_>,
        request: &RenderRequest,
    ) -> DecodeResult<AnimationOptions> {
        let kind = "StartAnimations";
        let duration = cursor.next_f64(kind)?;
        let curve_word = cursor.next(kind)?;
        let curve = AnimationCurve::from_wire(curve_word)
            .ok_or(DecodeError::UnknownAnimationCurve { value: curve_word })?;
        let begin_from_current_state = cursor.next(kind)? != 0;
        let crossfade = cursor.next(kind)? != 0;
        let stiffness = cursor.next_f64(kind)?;
        let damping = cursor.next_f64(kind)?;
        let control_points_index = cursor.next(kind)?;
        let completion_index = cursor.next(kind)?;
        let cancel_token = cursor.next(kind)?;

        let control_points = match request.resolve_attached(control_points_index)? {
            HostValue::Array(items) => items.iter().filter_map(HostValue::as_f64).collect(),
            _ => Vec::new(),
        };
        let completion = match request.resolve_attached(completion_index)? {
            HostValue::Null => None,
            value => Some(value.clone()),
        };

        Ok(AnimationOptions {
            duration,
            curve,
            begin_from_current_state,
            crossfade,
            stiffness,
            damping,
            control_points,
            completion,
            cancel_token,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
