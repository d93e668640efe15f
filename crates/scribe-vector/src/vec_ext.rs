use std::sync::Once;

use sqlite_vec::sqlite3_vec_init;

/// Registers the sqlite-vec extension globally (once per process).
/// Must run before any collection connection is opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature sqlite3_auto_extension
        // expects; the pointer targets a statically linked symbol that stays
        // valid for the life of the process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered");
    });
}

/// Encode an embedding as the little-endian f32 blob sqlite-vec stores.
pub(crate) fn vector_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}
