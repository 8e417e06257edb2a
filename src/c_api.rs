//! C API for renderers written in C
//!
//! The backend is handed out as an opaque pointer. Every function accepts
//! a null pointer and does nothing with it.

use crate::backend::Backend;
use crate::kms::KmsDevice;
use crate::surface::Surface;
use std::ffi::c_int;
use std::ptr;
use tracing::{debug, error, info};

/// Opaque backend handle
pub struct KmsBackend {
    inner: Backend,
}

/// A drawable surface as seen from C
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KmsSurface {
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub pixel_bytes: u32,
    pub data: *mut u8,
}

impl KmsSurface {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            row_bytes: 0,
            pixel_bytes: 0,
            data: ptr::null_mut(),
        }
    }
}

fn describe<D: KmsDevice>(surface: &Surface<D>) -> KmsSurface {
    KmsSurface {
        width: surface.width(),
        height: surface.height(),
        row_bytes: surface.row_bytes(),
        pixel_bytes: surface.pixel_bytes(),
        data: surface.as_mut_ptr(),
    }
}

/// Discover a display and light it up. Returns null on failure.
#[no_mangle]
pub extern "C" fn kms_backend_create() -> *mut KmsBackend {
    match Backend::init() {
        Ok(inner) => {
            info!("kms_backend_create: backend ready");
            Box::into_raw(Box::new(KmsBackend { inner }))
        }
        Err(e) => {
            error!("Failed to initialize KMS backend: {}", e);
            ptr::null_mut()
        }
    }
}

/// Surface to draw into
#[no_mangle]
pub unsafe extern "C" fn kms_backend_surface(backend: *mut KmsBackend) -> KmsSurface {
    match backend.as_mut() {
        Some(b) => describe(b.inner.surface()),
        None => KmsSurface::empty(),
    }
}

/// Present the current surface and return the next one to draw into
#[no_mangle]
pub unsafe extern "C" fn kms_backend_flip(backend: *mut KmsBackend) -> KmsSurface {
    match backend.as_mut() {
        Some(b) => describe(b.inner.flip()),
        None => KmsSurface::empty(),
    }
}

/// Blank or unblank the active output
#[no_mangle]
pub unsafe extern "C" fn kms_backend_blank(backend: *mut KmsBackend, blank: bool) {
    if let Some(b) = backend.as_mut() {
        if let Err(e) = b.inner.blank(blank) {
            error!("kms_backend_blank({}) failed: {}", blank, e);
        }
    }
}

/// Blank or unblank one output. Returns 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn kms_backend_blank_output(
    backend: *mut KmsBackend,
    index: u32,
    blank: bool,
) -> c_int {
    let Some(b) = backend.as_mut() else {
        return -1;
    };
    match b.inner.blank_output(index as usize, blank) {
        Ok(()) => 0,
        Err(e) => {
            error!("kms_backend_blank_output({}, {}) failed: {}", index, blank, e);
            -1
        }
    }
}

/// Select the output surface/flip act on. Returns 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn kms_backend_set_active_output(
    backend: *mut KmsBackend,
    index: u32,
) -> c_int {
    let Some(b) = backend.as_mut() else {
        return -1;
    };
    match b.inner.set_active_output(index as usize) {
        Ok(()) => 0,
        Err(e) => {
            error!("kms_backend_set_active_output({}) failed: {}", index, e);
            -1
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn kms_backend_has_multiple_outputs(backend: *const KmsBackend) -> bool {
    backend
        .as_ref()
        .map_or(false, |b| b.inner.has_multiple_outputs())
}

/// Tear the pipeline down and release every kernel object
#[no_mangle]
pub unsafe extern "C" fn kms_backend_destroy(backend: *mut KmsBackend) {
    if backend.is_null() {
        return;
    }
    debug!("kms_backend_destroy");
    drop(Box::from_raw(backend));
}
