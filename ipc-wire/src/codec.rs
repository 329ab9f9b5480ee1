//! The serialization engine (spec §4.3): size computation, in-place
//! encode/decode, exhaustive validation, and cross-buffer deep copy.
//!
//! Every operation here is driven purely by a `(kind, descriptor)` pair
//! walked depth-first — there is no reflection and no dynamic type
//! information beyond the static tables in [`descriptor`](crate::descriptor).
//! This mirrors the teacher's `cmif`/`hipc` request builders, which compute
//! layouts from a fixed `RequestFormat`/`Metadata` rather than inspecting
//! the payload type at runtime.
//!
//! A struct or array's `num_bytes` header field is, throughout this module,
//! the *total* on-wire size of that object including its own 8-byte header
//! — the same quantity [`Buffer::alloc`](crate::buffer::Buffer::alloc)
//! returns room for.

use alloc::vec::Vec;

use ipc_handle::{Handle, INVALID_HANDLE};

use crate::buffer::{array_total_bytes, Buffer};
use crate::descriptor::{ArrayDescriptor, Descriptor, FieldKind, StructDescriptor, UnionDescriptor};
use crate::error::ValidationError;
use crate::handles::HandleTable;
use crate::header::{ARRAY_HEADER_SIZE, INVALID_HANDLE_INDEX, STRUCT_HEADER_SIZE, UNION_LAYOUT_SIZE};

type VResult<T> = Result<T, ValidationError>;

// ---------------------------------------------------------------------------
// compute_serialized_size (§4.3.1)
// ---------------------------------------------------------------------------

/// Returns the out-of-line footprint of the object graph rooted at `buf`'s
/// root struct, **excluding** the root's own inline bytes (spec §4.3.1).
/// The buffer must hold an unencoded (absolute-offset) tree, as produced by
/// the `alloc_*` helpers and direct field writes — not yet
/// [`encode`]d.
pub fn compute_serialized_size(buf: &Buffer, descriptor: &StructDescriptor) -> VResult<u32> {
    struct_additional_size(buf, 0, descriptor)
}

fn total_object_size(buf: &Buffer, offset: u32, descriptor: &Descriptor) -> VResult<u32> {
    match descriptor {
        Descriptor::Struct(sd) => {
            let own = read_u32(buf, offset)?;
            let additional = struct_additional_size(buf, offset, sd)?;
            Ok(own + additional)
        }
        Descriptor::Array(ad) => {
            let own = read_u32(buf, offset)?;
            let additional = array_additional_size(buf, offset, ad)?;
            Ok(own + additional)
        }
        Descriptor::Union(ud) => {
            let additional = union_additional_size(buf, offset, ud)?;
            Ok(UNION_LAYOUT_SIZE as u32 + additional)
        }
    }
}

fn struct_additional_size(buf: &Buffer, offset: u32, desc: &StructDescriptor) -> VResult<u32> {
    let version = read_u32(buf, offset + 4)?;
    let body_offset = offset + STRUCT_HEADER_SIZE as u32;
    let mut sum = 0u32;
    for entry in desc.entries {
        if entry.min_version > version {
            continue;
        }
        let field_offset = body_offset + entry.offset as u32;
        sum = sum
            .checked_add(field_additional_size(buf, field_offset, entry.kind, entry.child)?)
            .ok_or(ValidationError::IllegalMemoryRange)?;
    }
    Ok(sum)
}

fn array_additional_size(buf: &Buffer, offset: u32, desc: &ArrayDescriptor) -> VResult<u32> {
    if desc.elem_kind == FieldKind::PlainOldData {
        return Ok(0);
    }
    let num_elements = read_u32(buf, offset + 4)?;
    let elements_offset = offset + ARRAY_HEADER_SIZE as u32;
    let stride = element_stride(desc.elem_kind);
    let mut sum = 0u32;
    for i in 0..num_elements {
        let field_offset = elements_offset
            .checked_add(i.checked_mul(stride).ok_or(ValidationError::IllegalMemoryRange)?)
            .ok_or(ValidationError::IllegalMemoryRange)?;
        sum = sum
            .checked_add(field_additional_size(buf, field_offset, desc.elem_kind, desc.elem_child)?)
            .ok_or(ValidationError::IllegalMemoryRange)?;
    }
    Ok(sum)
}

fn union_additional_size(buf: &Buffer, offset: u32, desc: &UnionDescriptor) -> VResult<u32> {
    let size = read_u32(buf, offset)?;
    if size == 0 {
        return Ok(0);
    }
    let tag = read_u32(buf, offset + 4)?;
    let payload_offset = offset + 8;
    match desc.entry(tag) {
        Some(entry) => field_additional_size(buf, payload_offset, entry.kind, entry.child),
        None => Ok(0),
    }
}

fn field_additional_size(
    buf: &Buffer,
    field_offset: u32,
    kind: FieldKind,
    child: Option<&'static Descriptor>,
) -> VResult<u32> {
    match kind {
        FieldKind::PlainOldData | FieldKind::Handle | FieldKind::Interface => Ok(0),
        FieldKind::UnionInline => {
            let desc = match child {
                Some(Descriptor::Union(ud)) => ud,
                _ => return Ok(0),
            };
            union_additional_size(buf, field_offset, desc)
        }
        FieldKind::StructPtr | FieldKind::MapPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr => {
            let target = read_u64(buf, field_offset)?;
            if target == 0 {
                return Ok(0);
            }
            let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
            let child = child.ok_or(ValidationError::IllegalPointer)?;
            total_object_size(buf, target, child)
        }
    }
}

/// Byte width of one array element's on-wire slot, including padding to its
/// natural field width (handles/interfaces are 4 bytes, everything else
/// reference-shaped is 8; `PlainOldData` element widths are carried by
/// `elem_bits` and packed without per-element padding, so callers computing
/// footprints for POD arrays never reach this function).
fn element_stride(kind: FieldKind) -> u32 {
    match kind {
        FieldKind::Handle | FieldKind::Interface => 4,
        FieldKind::UnionInline => UNION_LAYOUT_SIZE as u32,
        _ => 8,
    }
}

// ---------------------------------------------------------------------------
// encode (§4.3.2)
// ---------------------------------------------------------------------------

/// Encodes the object graph rooted at `buf`'s root struct in place,
/// converting every absolute pointer cell to a cell-relative offset and
/// moving every handle field into `handles`, replacing it with its index
/// (spec §4.3.2).
pub fn encode(buf: &mut Buffer, descriptor: &StructDescriptor, handles: &mut HandleTable) -> VResult<()> {
    encode_struct(buf, 0, descriptor, handles)
}

fn encode_struct(buf: &mut Buffer, offset: u32, desc: &StructDescriptor, handles: &mut HandleTable) -> VResult<()> {
    let version = read_u32(buf, offset + 4)?;
    let body_offset = offset + STRUCT_HEADER_SIZE as u32;
    for entry in desc.entries {
        if entry.min_version > version {
            continue;
        }
        let field_offset = body_offset + entry.offset as u32;
        encode_field(buf, field_offset, entry.kind, entry.child, handles)?;
    }
    Ok(())
}

fn encode_array(buf: &mut Buffer, offset: u32, desc: &ArrayDescriptor, handles: &mut HandleTable) -> VResult<()> {
    if desc.elem_kind == FieldKind::PlainOldData {
        return Ok(());
    }
    let num_elements = read_u32(buf, offset + 4)?;
    let elements_offset = offset + ARRAY_HEADER_SIZE as u32;
    let stride = element_stride(desc.elem_kind);
    for i in 0..num_elements {
        let field_offset = elements_offset + i * stride;
        encode_field(buf, field_offset, desc.elem_kind, desc.elem_child, handles)?;
    }
    Ok(())
}

fn encode_union(buf: &mut Buffer, offset: u32, desc: &UnionDescriptor, handles: &mut HandleTable) -> VResult<()> {
    let size = read_u32(buf, offset)?;
    if size == 0 {
        return Ok(());
    }
    let tag = read_u32(buf, offset + 4)?;
    let payload_offset = offset + 8;
    if let Some(entry) = desc.entry(tag) {
        encode_field(buf, payload_offset, entry.kind, entry.child, handles)?;
    }
    Ok(())
}

fn encode_field(
    buf: &mut Buffer,
    field_offset: u32,
    kind: FieldKind,
    child: Option<&'static Descriptor>,
    handles: &mut HandleTable,
) -> VResult<()> {
    match kind {
        FieldKind::PlainOldData => Ok(()),
        FieldKind::Handle | FieldKind::Interface => {
            encode_handle_slot(buf, field_offset, handles)
        }
        FieldKind::UnionInline => match child {
            Some(Descriptor::Union(ud)) => encode_union(buf, field_offset, ud, handles),
            _ => Ok(()),
        },
        FieldKind::StructPtr | FieldKind::MapPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr => {
            encode_pointer_cell(buf, field_offset, child, handles)
        }
    }
}

fn encode_pointer_cell(
    buf: &mut Buffer,
    cell_offset: u32,
    child: Option<&'static Descriptor>,
    handles: &mut HandleTable,
) -> VResult<()> {
    let target = read_u64(buf, cell_offset)?;
    if target == 0 {
        return Ok(());
    }
    let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
    let child = child.ok_or(ValidationError::IllegalPointer)?;
    match child {
        Descriptor::Struct(sd) => encode_struct(buf, target, sd, handles)?,
        Descriptor::Array(ad) => encode_array(buf, target, ad, handles)?,
        Descriptor::Union(ud) => encode_union(buf, target, ud, handles)?,
    }
    let rel = i64::from(target) - i64::from(cell_offset);
    debug_assert!(rel > 0, "pointer targets must be forward of their cell");
    write_u64(buf, cell_offset, rel as u64);
    Ok(())
}

fn encode_handle_slot(buf: &mut Buffer, slot_offset: u32, handles: &mut HandleTable) -> VResult<()> {
    let raw = read_u32(buf, slot_offset)?;
    if raw == INVALID_HANDLE {
        write_u32(buf, slot_offset, INVALID_HANDLE_INDEX);
        return Ok(());
    }
    let handle = unsafe { Handle::from_raw(raw) };
    let index = handles.push(handle);
    write_u32(buf, slot_offset, index);
    Ok(())
}

// ---------------------------------------------------------------------------
// decode (§4.3.3)
// ---------------------------------------------------------------------------

/// The inverse of [`encode`]: restores absolute pointers and moves handles
/// back out of `handles` into the payload, resetting consumed slots to
/// invalid.
pub fn decode(buf: &mut Buffer, descriptor: &StructDescriptor, handles: &mut HandleTable) -> VResult<()> {
    decode_struct(buf, 0, descriptor, handles)
}

fn decode_struct(buf: &mut Buffer, offset: u32, desc: &StructDescriptor, handles: &mut HandleTable) -> VResult<()> {
    let version = read_u32(buf, offset + 4)?;
    let body_offset = offset + STRUCT_HEADER_SIZE as u32;
    for entry in desc.entries {
        if entry.min_version > version {
            continue;
        }
        let field_offset = body_offset + entry.offset as u32;
        decode_field(buf, field_offset, entry.kind, entry.child, handles)?;
    }
    Ok(())
}

fn decode_array(buf: &mut Buffer, offset: u32, desc: &ArrayDescriptor, handles: &mut HandleTable) -> VResult<()> {
    if desc.elem_kind == FieldKind::PlainOldData {
        return Ok(());
    }
    let num_elements = read_u32(buf, offset + 4)?;
    let elements_offset = offset + ARRAY_HEADER_SIZE as u32;
    let stride = element_stride(desc.elem_kind);
    for i in 0..num_elements {
        let field_offset = elements_offset + i * stride;
        decode_field(buf, field_offset, desc.elem_kind, desc.elem_child, handles)?;
    }
    Ok(())
}

fn decode_union(buf: &mut Buffer, offset: u32, desc: &UnionDescriptor, handles: &mut HandleTable) -> VResult<()> {
    let size = read_u32(buf, offset)?;
    if size == 0 {
        return Ok(());
    }
    let tag = read_u32(buf, offset + 4)?;
    let payload_offset = offset + 8;
    if let Some(entry) = desc.entry(tag) {
        decode_field(buf, payload_offset, entry.kind, entry.child, handles)?;
    }
    Ok(())
}

fn decode_field(
    buf: &mut Buffer,
    field_offset: u32,
    kind: FieldKind,
    child: Option<&'static Descriptor>,
    handles: &mut HandleTable,
) -> VResult<()> {
    match kind {
        FieldKind::PlainOldData => Ok(()),
        FieldKind::Handle | FieldKind::Interface => decode_handle_slot(buf, field_offset, handles),
        FieldKind::UnionInline => match child {
            Some(Descriptor::Union(ud)) => decode_union(buf, field_offset, ud, handles),
            _ => Ok(()),
        },
        FieldKind::StructPtr | FieldKind::MapPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr => {
            decode_pointer_cell(buf, field_offset, child, handles)
        }
    }
}

fn decode_pointer_cell(
    buf: &mut Buffer,
    cell_offset: u32,
    child: Option<&'static Descriptor>,
    handles: &mut HandleTable,
) -> VResult<()> {
    let rel = read_u64(buf, cell_offset)?;
    if rel == 0 {
        return Ok(());
    }
    let target = u64::from(cell_offset) + rel;
    let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
    write_u64(buf, cell_offset, u64::from(target));
    let child = child.ok_or(ValidationError::IllegalPointer)?;
    match child {
        Descriptor::Struct(sd) => decode_struct(buf, target, sd, handles),
        Descriptor::Array(ad) => decode_array(buf, target, ad, handles),
        Descriptor::Union(ud) => decode_union(buf, target, ud, handles),
    }
}

fn decode_handle_slot(buf: &mut Buffer, slot_offset: u32, handles: &mut HandleTable) -> VResult<()> {
    let index = read_u32(buf, slot_offset)?;
    if index == INVALID_HANDLE_INDEX {
        write_u32(buf, slot_offset, INVALID_HANDLE);
        return Ok(());
    }
    let handle = handles.take(index).ok_or(ValidationError::IllegalHandle)?;
    write_u32(buf, slot_offset, handle.to_raw());
    Ok(())
}

// ---------------------------------------------------------------------------
// validate (§4.3.4)
// ---------------------------------------------------------------------------

/// The two monotonically non-decreasing cursors validation threads through
/// every recursive call (spec §4.3.4).
#[derive(Debug, Clone, Copy)]
pub struct ValidateCtx {
    /// The smallest byte offset any future pointer target may land on.
    pub next_pointer: u32,
    /// The smallest handle index any future handle slot may carry.
    pub next_handle_index: u32,
}

impl ValidateCtx {
    /// A fresh context with both cursors at zero.
    pub fn new() -> Self {
        Self { next_pointer: 0, next_handle_index: 0 }
    }
}

impl Default for ValidateCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Exhaustively validates an encoded, untrusted buffer against
/// `descriptor`. Never panics and never reads past `buf`'s length for any
/// input (spec §4.3.4).
pub fn validate(buf: &Buffer, descriptor: &StructDescriptor, num_handles: u32) -> VResult<()> {
    let mut ctx = ValidateCtx::new();
    validate_struct(buf, 0, descriptor, &mut ctx, num_handles)
}

fn check_alignment(offset: u32) -> VResult<()> {
    if offset as usize % crate::header::ALIGNMENT != 0 {
        return Err(ValidationError::MisalignedObject);
    }
    Ok(())
}

fn validate_struct(
    buf: &Buffer,
    offset: u32,
    desc: &StructDescriptor,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    check_alignment(offset)?;
    let num_bytes = read_u32(buf, offset)?;
    let version = read_u32(buf, offset + 4)?;
    if num_bytes as usize % crate::header::ALIGNMENT != 0 {
        return Err(ValidationError::UnexpectedStructHeader);
    }
    let known_body = desc.body_size_for_version(version);
    let highest_known = desc.highest_known_version();
    let size_ok = match known_body {
        Some(expected) => num_bytes == expected,
        None => version > highest_known && num_bytes >= desc.highest_known_body_size(),
    };
    if !size_ok {
        return Err(ValidationError::UnexpectedStructHeader);
    }
    let end = offset.checked_add(num_bytes).ok_or(ValidationError::IllegalMemoryRange)?;
    if end as usize > buf.num_bytes_used() {
        return Err(ValidationError::IllegalMemoryRange);
    }
    ctx.next_pointer = ctx.next_pointer.max(end);

    let body_offset = offset + STRUCT_HEADER_SIZE as u32;
    for entry in desc.entries {
        if entry.min_version > version {
            continue;
        }
        let field_offset = body_offset + entry.offset as u32;
        validate_field(buf, field_offset, entry.kind, entry.child, entry.nullable, ctx, num_handles)?;
    }
    Ok(())
}

fn validate_array(
    buf: &Buffer,
    offset: u32,
    desc: &ArrayDescriptor,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    check_alignment(offset)?;
    let num_bytes = read_u32(buf, offset)?;
    let num_elements = read_u32(buf, offset + 4)?;
    if num_bytes < ARRAY_HEADER_SIZE as u32 || num_bytes as usize % crate::header::ALIGNMENT != 0 {
        return Err(ValidationError::UnexpectedArrayHeader);
    }
    if let Some(fixed) = desc.fixed_len {
        if fixed != num_elements {
            return Err(ValidationError::UnexpectedArrayHeader);
        }
    }
    let expected_min = array_total_bytes(ARRAY_HEADER_SIZE as u32, desc.elem_bits, num_elements)
        .ok_or(ValidationError::IllegalMemoryRange)?;
    if num_bytes < expected_min {
        return Err(ValidationError::UnexpectedArrayHeader);
    }
    let end = offset.checked_add(num_bytes).ok_or(ValidationError::IllegalMemoryRange)?;
    if end as usize > buf.num_bytes_used() {
        return Err(ValidationError::IllegalMemoryRange);
    }
    ctx.next_pointer = ctx.next_pointer.max(end);

    if desc.elem_kind == FieldKind::PlainOldData {
        return Ok(());
    }
    let elements_offset = offset + ARRAY_HEADER_SIZE as u32;
    let stride = element_stride(desc.elem_kind);
    for i in 0..num_elements {
        let field_offset = elements_offset
            .checked_add(i.checked_mul(stride).ok_or(ValidationError::IllegalMemoryRange)?)
            .ok_or(ValidationError::IllegalMemoryRange)?;
        validate_field(buf, field_offset, desc.elem_kind, desc.elem_child, desc.nullable, ctx, num_handles)?;
    }
    Ok(())
}

fn validate_union(
    buf: &Buffer,
    offset: u32,
    desc: &UnionDescriptor,
    nullable: bool,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    check_alignment(offset)?;
    let size = read_u32(buf, offset)?;
    if size == 0 {
        if !nullable {
            return Err(ValidationError::UnexpectedNullUnion);
        }
        return Ok(());
    }
    if size != UNION_LAYOUT_SIZE as u32 {
        return Err(ValidationError::IllegalMemoryRange);
    }
    let tag = read_u32(buf, offset + 4)?;
    let payload_offset = offset + 8;
    // Unknown tags are forward-compatible: the payload is left unvalidated.
    if let Some(entry) = desc.entry(tag) {
        validate_field(buf, payload_offset, entry.kind, entry.child, entry.nullable, ctx, num_handles)?;
    }
    Ok(())
}

fn validate_field(
    buf: &Buffer,
    field_offset: u32,
    kind: FieldKind,
    child: Option<&'static Descriptor>,
    nullable: bool,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    match kind {
        FieldKind::PlainOldData => Ok(()),
        FieldKind::Handle | FieldKind::Interface => validate_handle_slot(buf, field_offset, nullable, ctx, num_handles),
        FieldKind::UnionInline => match child {
            Some(Descriptor::Union(ud)) => validate_union(buf, field_offset, ud, nullable, ctx, num_handles),
            _ => Ok(()),
        },
        FieldKind::StructPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr => {
            match validate_pointer_cell(buf, field_offset, ctx)? {
                None => {
                    if !nullable {
                        return Err(ValidationError::UnexpectedNullPointer);
                    }
                    Ok(())
                }
                Some(target) => {
                    let child = child.ok_or(ValidationError::IllegalPointer)?;
                    validate_descriptor_at(buf, target, child, ctx, num_handles)
                }
            }
        }
        FieldKind::MapPtr => match validate_pointer_cell(buf, field_offset, ctx)? {
            None => {
                if !nullable {
                    return Err(ValidationError::UnexpectedNullPointer);
                }
                Ok(())
            }
            Some(target) => {
                let child = child.ok_or(ValidationError::IllegalPointer)?;
                let Descriptor::Struct(map_struct) = child else {
                    return Err(ValidationError::IllegalPointer);
                };
                validate_struct(buf, target, map_struct, ctx, num_handles)?;
                validate_map_lengths(buf, target, map_struct)
            }
        },
    }
}

fn validate_descriptor_at(
    buf: &Buffer,
    offset: u32,
    descriptor: &Descriptor,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    match descriptor {
        Descriptor::Struct(sd) => validate_struct(buf, offset, sd, ctx, num_handles),
        Descriptor::Array(ad) => validate_array(buf, offset, ad, ctx, num_handles),
        Descriptor::Union(ud) => validate_union(buf, offset, ud, false, ctx, num_handles),
    }
}

/// A map is a struct whose first two body fields are the keys and values
/// array pointers (spec §3 "Map", §4.3.4 map-specific rule).
fn validate_map_lengths(buf: &Buffer, struct_offset: u32, map_struct: &StructDescriptor) -> VResult<()> {
    if map_struct.entries.len() < 2 {
        return Err(ValidationError::DifferentSizedArraysInMap);
    }
    let body_offset = struct_offset + STRUCT_HEADER_SIZE as u32;
    let keys_cell = body_offset + map_struct.entries[0].offset as u32;
    let values_cell = body_offset + map_struct.entries[1].offset as u32;
    let keys_len = array_len_through_pointer(buf, keys_cell)?;
    let values_len = array_len_through_pointer(buf, values_cell)?;
    if keys_len != values_len {
        return Err(ValidationError::DifferentSizedArraysInMap);
    }
    Ok(())
}

fn array_len_through_pointer(buf: &Buffer, cell_offset: u32) -> VResult<u32> {
    let rel = read_u64(buf, cell_offset)?;
    if rel == 0 {
        return Ok(0);
    }
    let target = u64::from(cell_offset) + rel;
    let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
    read_u32(buf, target + 4)
}

fn validate_pointer_cell(buf: &Buffer, cell_offset: u32, ctx: &mut ValidateCtx) -> VResult<Option<u32>> {
    let rel = read_u64(buf, cell_offset)?;
    if rel == 0 {
        return Ok(None);
    }
    if rel as usize % crate::header::ALIGNMENT != 0 {
        return Err(ValidationError::IllegalPointer);
    }
    let target = u64::from(cell_offset).checked_add(rel).ok_or(ValidationError::IllegalMemoryRange)?;
    let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
    if target < ctx.next_pointer || target as usize > buf.num_bytes_used() {
        return Err(ValidationError::IllegalPointer);
    }
    Ok(Some(target))
}

fn validate_handle_slot(
    buf: &Buffer,
    slot_offset: u32,
    nullable: bool,
    ctx: &mut ValidateCtx,
    num_handles: u32,
) -> VResult<()> {
    let index = read_u32(buf, slot_offset)?;
    if index == INVALID_HANDLE_INDEX {
        if !nullable {
            return Err(ValidationError::UnexpectedInvalidHandle);
        }
        return Ok(());
    }
    if index < ctx.next_handle_index || index >= num_handles {
        return Err(ValidationError::IllegalHandle);
    }
    ctx.next_handle_index = index + 1;
    Ok(())
}

// ---------------------------------------------------------------------------
// deep_copy (§4.3.5)
// ---------------------------------------------------------------------------

/// Produces a self-contained copy of the unencoded object graph rooted at
/// `src_offset` into `dest`, returning the new root's offset. Handle slots
/// are copied by value — duplicating the underlying capability, if that is
/// desired, is the caller's responsibility before or after the copy.
pub fn deep_copy(
    src: &Buffer,
    src_offset: u32,
    descriptor: &StructDescriptor,
    dest: &mut Buffer,
) -> VResult<u32> {
    deep_copy_struct(src, src_offset, descriptor, dest)
}

fn deep_copy_struct(src: &Buffer, offset: u32, desc: &StructDescriptor, dest: &mut Buffer) -> VResult<u32> {
    let num_bytes = read_u32(src, offset)?;
    let version = read_u32(src, offset + 4)?;
    let new_offset = dest.alloc(num_bytes as usize).ok_or(ValidationError::IllegalMemoryRange)?;
    copy_raw(src, offset, dest, new_offset, num_bytes)?;

    let body_offset = offset + STRUCT_HEADER_SIZE as u32;
    let new_body_offset = new_offset + STRUCT_HEADER_SIZE as u32;
    for entry in desc.entries {
        if entry.min_version > version {
            continue;
        }
        let field_offset = body_offset + entry.offset as u32;
        let new_field_offset = new_body_offset + entry.offset as u32;
        deep_copy_field(src, field_offset, entry.kind, entry.child, dest, new_field_offset)?;
    }
    Ok(new_offset)
}

fn deep_copy_array(src: &Buffer, offset: u32, desc: &ArrayDescriptor, dest: &mut Buffer) -> VResult<u32> {
    let num_bytes = read_u32(src, offset)?;
    let num_elements = read_u32(src, offset + 4)?;
    let new_offset = dest.alloc(num_bytes as usize).ok_or(ValidationError::IllegalMemoryRange)?;
    copy_raw(src, offset, dest, new_offset, num_bytes)?;

    if desc.elem_kind == FieldKind::PlainOldData {
        return Ok(new_offset);
    }
    let elements_offset = offset + ARRAY_HEADER_SIZE as u32;
    let new_elements_offset = new_offset + ARRAY_HEADER_SIZE as u32;
    let stride = element_stride(desc.elem_kind);
    for i in 0..num_elements {
        let field_offset = elements_offset + i * stride;
        let new_field_offset = new_elements_offset + i * stride;
        deep_copy_field(src, field_offset, desc.elem_kind, desc.elem_child, dest, new_field_offset)?;
    }
    Ok(new_offset)
}

/// Copies an out-of-line union into a freshly allocated object, returning
/// its offset.
fn deep_copy_union(src: &Buffer, offset: u32, desc: &UnionDescriptor, dest: &mut Buffer) -> VResult<u32> {
    let new_offset = dest.alloc(UNION_LAYOUT_SIZE).ok_or(ValidationError::IllegalMemoryRange)?;
    copy_raw(src, offset, dest, new_offset, UNION_LAYOUT_SIZE as u32)?;
    deep_copy_union_in_place(src, offset, desc, dest, new_offset)?;
    Ok(new_offset)
}

/// Relocates an inline union's payload at `new_offset`, which already holds
/// a bulk byte copy of the union made by the enclosing struct/array's
/// `copy_raw` — no allocation happens here.
fn deep_copy_union_in_place(
    src: &Buffer,
    offset: u32,
    desc: &UnionDescriptor,
    dest: &mut Buffer,
    new_offset: u32,
) -> VResult<()> {
    let size = read_u32(src, offset)?;
    if size == 0 {
        return Ok(());
    }
    let tag = read_u32(src, offset + 4)?;
    match desc.entry(tag) {
        Some(entry) => {
            let payload_offset = offset + 8;
            let new_payload_offset = new_offset + 8;
            deep_copy_field(src, payload_offset, entry.kind, entry.child, dest, new_payload_offset)
        }
        None if tag < desc.num_fields_known || tag == INVALID_HANDLE_INDEX => Ok(()),
        None => Err(ValidationError::UnknownUnionTag),
    }
}

fn deep_copy_field(
    src: &Buffer,
    field_offset: u32,
    kind: FieldKind,
    child: Option<&'static Descriptor>,
    dest: &mut Buffer,
    new_field_offset: u32,
) -> VResult<()> {
    match kind {
        FieldKind::PlainOldData | FieldKind::Handle | FieldKind::Interface => Ok(()),
        FieldKind::UnionInline => match child {
            Some(Descriptor::Union(ud)) => {
                deep_copy_union_in_place(src, field_offset, ud, dest, new_field_offset)
            }
            _ => Ok(()),
        },
        FieldKind::StructPtr | FieldKind::MapPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr => {
            let target = read_u64(src, field_offset)?;
            if target == 0 {
                return Ok(());
            }
            let target = u32::try_from(target).map_err(|_| ValidationError::IllegalMemoryRange)?;
            let child = child.ok_or(ValidationError::IllegalPointer)?;
            let new_target = match child {
                Descriptor::Struct(sd) => deep_copy_struct(src, target, sd, dest)?,
                Descriptor::Array(ad) => deep_copy_array(src, target, ad, dest)?,
                Descriptor::Union(ud) => deep_copy_union(src, target, ud, dest)?,
            };
            write_u64(dest, new_field_offset, u64::from(new_target));
            Ok(())
        }
    }
}

fn copy_raw(src: &Buffer, src_offset: u32, dest: &mut Buffer, dest_offset: u32, len: u32) -> VResult<()> {
    let bytes = src
        .read_slice(src_offset, len as usize)
        .ok_or(ValidationError::IllegalMemoryRange)?;
    let bytes: Vec<u8> = bytes.to_vec();
    dest.write_slice(dest_offset, &bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared low-level accessors
// ---------------------------------------------------------------------------

fn read_u32(buf: &Buffer, offset: u32) -> VResult<u32> {
    buf.read_u32(offset).ok_or(ValidationError::IllegalMemoryRange)
}

fn read_u64(buf: &Buffer, offset: u32) -> VResult<u64> {
    buf.read_u64(offset).ok_or(ValidationError::IllegalMemoryRange)
}

fn write_u32(buf: &mut Buffer, offset: u32, value: u32) {
    buf.write_u32(offset, value);
}

fn write_u64(buf: &mut Buffer, offset: u32, value: u64) {
    buf.write_u64(offset, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{StructEntry, VersionInfo};

    // A Rect { x: u32, y: u32, w: u32, h: u32 } struct: header(8) + 16 bytes
    // body = 24 bytes total, matching the spec §8 struct-of-structs seed test.
    static RECT: StructDescriptor = StructDescriptor {
        entries: &[],
        versions: &[VersionInfo { version: 0, body_size: 24 }],
    };

    // RectPair { a: Rect*, b: Rect* }: header(8) + 16 bytes of two pointer
    // cells = 24 bytes total, with `a` at body offset 0 and `b` at offset 8.
    static RECT_DESCRIPTOR: Descriptor = Descriptor::Struct(&RECT);
    static RECT_PAIR: StructDescriptor = StructDescriptor {
        entries: &[
            StructEntry { kind: FieldKind::StructPtr, child: Some(&RECT_DESCRIPTOR), offset: 0, min_version: 0, nullable: false },
            StructEntry { kind: FieldKind::StructPtr, child: Some(&RECT_DESCRIPTOR), offset: 8, min_version: 0, nullable: false },
        ],
        versions: &[VersionInfo { version: 0, body_size: 16 }],
    };

    fn build_rect_pair() -> Buffer {
        // root RectPair at 0 (24 bytes) , Rect a at 24 (24 bytes), Rect b at 48 (24 bytes).
        let mut buf = Buffer::with_capacity(72);
        let root = buf.alloc(24).unwrap();
        assert_eq!(root, 0);
        buf.write_u32(root, 24);
        buf.write_u32(root + 4, 0);

        let rect_a = buf.alloc(24).unwrap();
        buf.write_u32(rect_a, 24);
        buf.write_u32(rect_a + 4, 0);

        let rect_b = buf.alloc(24).unwrap();
        buf.write_u32(rect_b, 24);
        buf.write_u32(rect_b + 4, 0);

        buf.write_u64(root + 8, u64::from(rect_a));
        buf.write_u64(root + 16, u64::from(rect_b));
        buf
    }

    #[test]
    fn compute_serialized_size_of_struct_of_structs() {
        let buf = build_rect_pair();
        // root's own 24 bytes are excluded; two 24-byte Rects remain.
        assert_eq!(compute_serialized_size(&buf, &RECT_PAIR).unwrap(), 48);
        assert_eq!(buf.num_bytes_used(), 72);
    }

    #[test]
    fn encode_then_decode_struct_of_structs_round_trips_pointers() {
        let mut buf = build_rect_pair();
        let mut handles = HandleTable::new();
        encode(&mut buf, &RECT_PAIR, &mut handles).unwrap();
        // cell at root+8 pointed at absolute 24, now relative: 24 - 8 = 16.
        assert_eq!(buf.read_u64(8), Some(16));
        // cell at root+16 pointed at absolute 48, now relative: 48 - 16 = 32.
        assert_eq!(buf.read_u64(16), Some(32));

        decode(&mut buf, &RECT_PAIR, &mut handles).unwrap();
        assert_eq!(buf.read_u64(8), Some(24));
        assert_eq!(buf.read_u64(16), Some(48));
    }

    #[test]
    fn validate_accepts_a_well_formed_struct_of_structs() {
        let mut buf = build_rect_pair();
        let mut handles = HandleTable::new();
        encode(&mut buf, &RECT_PAIR, &mut handles).unwrap();
        assert_eq!(validate(&buf, &RECT_PAIR, 0), Ok(()));
    }

    #[test]
    fn validate_rejects_a_pointer_that_targets_an_already_consumed_region() {
        let mut buf = build_rect_pair();
        let mut handles = HandleTable::new();
        encode(&mut buf, &RECT_PAIR, &mut handles).unwrap();
        // Point `b` (cell at offset 16) back at `a`'s absolute offset (24),
        // which `next_pointer` has already advanced past once `a` validates.
        let rel_to_rect_a = 24i64 - 16i64;
        buf.write_u64(16, rel_to_rect_a as u64);
        assert_eq!(validate(&buf, &RECT_PAIR, 0), Err(ValidationError::IllegalPointer));
    }

    #[test]
    fn deep_copy_produces_an_independent_graph() {
        let buf = build_rect_pair();
        let mut dest = Buffer::with_capacity(72);
        let new_root = deep_copy(&buf, 0, &RECT_PAIR, &mut dest).unwrap();
        assert_eq!(new_root, 0);
        assert_eq!(dest.num_bytes_used(), 72);
        let a = dest.read_u64(8).unwrap();
        let b = dest.read_u64(16).unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_eq!(dest.read_u32(a as u32).unwrap(), 24);
    }

    // Array of 6 nullable inline unions (16 bytes each): header(8) + 6*16 = 104.
    static UNION_ARM: UnionDescriptor = UnionDescriptor { entries: &[], num_fields_known: 0 };
    static SIX_UNIONS: ArrayDescriptor = ArrayDescriptor {
        elem_kind: FieldKind::UnionInline,
        elem_child: Some(&Descriptor::Union(&UNION_ARM)),
        fixed_len: Some(6),
        elem_bits: 128,
        nullable: false,
    };

    #[test]
    fn array_of_six_nullable_unions_sizes_to_104_bytes() {
        assert_eq!(array_total_bytes(ARRAY_HEADER_SIZE as u32, SIX_UNIONS.elem_bits, 6), Some(104));
    }

    #[test]
    fn array_sizing_overflows_cleanly_at_u32_max_elements() {
        assert_eq!(array_total_bytes(ARRAY_HEADER_SIZE as u32, 32, u32::MAX), None);
    }

    // Holder { u: union } with the union stored inline at body offset 0:
    // header(8) + 16 bytes of union = 24 bytes total.
    static UNION_HOLDER: StructDescriptor = StructDescriptor {
        entries: &[StructEntry { kind: FieldKind::UnionInline, child: Some(&Descriptor::Union(&UNION_ARM)), offset: 0, min_version: 0, nullable: false }],
        versions: &[VersionInfo { version: 0, body_size: 16 }],
    };

    #[test]
    fn deep_copy_of_an_inline_union_allocates_nothing_beyond_the_holder() {
        let mut buf = Buffer::with_capacity(24);
        let root = buf.alloc(24).unwrap();
        buf.write_u32(root, 24);
        buf.write_u32(root + 4, 0);
        buf.write_u32(root + 8, 0); // null union

        let mut dest = Buffer::with_capacity(24);
        let new_root = deep_copy(&buf, root, &UNION_HOLDER, &mut dest).unwrap();
        assert_eq!(new_root, 0);
        assert_eq!(dest.num_bytes_used(), 24);
    }

    #[test]
    fn deep_copy_fails_on_an_unrecognized_tag_outside_the_producers_known_field_count() {
        let mut buf = Buffer::with_capacity(24);
        let root = buf.alloc(24).unwrap();
        buf.write_u32(root, 24);
        buf.write_u32(root + 4, 0);
        buf.write_u32(root + 8, UNION_LAYOUT_SIZE as u32);
        buf.write_u32(root + 12, 99); // UNION_ARM.num_fields_known is 0

        let mut dest = Buffer::with_capacity(24);
        assert_eq!(deep_copy(&buf, root, &UNION_HOLDER, &mut dest), Err(ValidationError::UnknownUnionTag));
    }

    #[test]
    fn deep_copy_accepts_a_newer_tag_within_the_producers_known_field_count() {
        static FORWARD_COMPAT_UNION: UnionDescriptor = UnionDescriptor { entries: &[], num_fields_known: 5 };
        static FORWARD_COMPAT_DESCRIPTOR: Descriptor = Descriptor::Union(&FORWARD_COMPAT_UNION);
        static HOLDER: StructDescriptor = StructDescriptor {
            entries: &[StructEntry { kind: FieldKind::UnionInline, child: Some(&FORWARD_COMPAT_DESCRIPTOR), offset: 0, min_version: 0, nullable: false }],
            versions: &[VersionInfo { version: 0, body_size: 16 }],
        };
        let mut buf = Buffer::with_capacity(24);
        let root = buf.alloc(24).unwrap();
        buf.write_u32(root, 24);
        buf.write_u32(root + 4, 0);
        buf.write_u32(root + 8, UNION_LAYOUT_SIZE as u32);
        buf.write_u32(root + 12, 3); // within num_fields_known, not yet in `entries`

        let mut dest = Buffer::with_capacity(24);
        assert!(deep_copy(&buf, root, &HOLDER, &mut dest).is_ok());
    }

    #[test]
    fn handle_slot_round_trips_through_encode_decode() {
        // A single-field struct holding one handle at body offset 0.
        static HOLDER: StructDescriptor = StructDescriptor {
            entries: &[StructEntry { kind: FieldKind::Handle, child: None, offset: 0, min_version: 0, nullable: true }],
            versions: &[VersionInfo { version: 0, body_size: 8 }],
        };
        let mut buf = Buffer::with_capacity(16);
        let root = buf.alloc(8).unwrap();
        buf.write_u32(root, 8);
        buf.write_u32(root + 4, 0);
        let raw_handle = unsafe { Handle::from_raw(7) };
        buf.write_u32(root + 8, raw_handle.to_raw());

        let mut handles = HandleTable::new();
        encode(&mut buf, &HOLDER, &mut handles).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(buf.read_u32(root + 8), Some(0));

        decode(&mut buf, &HOLDER, &mut handles).unwrap();
        assert_eq!(buf.read_u32(root + 8), Some(raw_handle.to_raw()));
    }
}
