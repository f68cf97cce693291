/// The demo query's fixed row layout: `(id, ts)`, both `i64`, matching the
/// two-column schema the formatter stage writes and the sink stage reads
/// back via [`nebula_unsafe_collection::TupleBuffer::get_buffer`]. No
/// padding between the fields -- both are 8-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Row {
    pub id: i64,
    pub ts: i64,
}
