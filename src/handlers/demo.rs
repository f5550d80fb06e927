use axum::{extract::Query, Json};
use serde::{Deserialize, Serialize};
use std::hint::black_box;
use std::time::Duration;

use super::AppError;
use crate::runtime::label_allocations;

/// Upper bound for `?mb=` so the demo cannot be used to exhaust memory.
const MAX_DEMO_MB: usize = 256;

/// Elements per array in the multi-namespace demo (300 KiB of `u8`).
const MULTI_ARRAY_LEN: usize = 1024 * 300;

const MULTI_TYPES: [[&str; 10]; 5] = [
    [
        "demo.types1.A", "demo.types1.B", "demo.types1.C", "demo.types1.D", "demo.types1.E",
        "demo.types1.F", "demo.types1.G", "demo.types1.H", "demo.types1.I", "demo.types1.J",
    ],
    [
        "demo.types2.A", "demo.types2.B", "demo.types2.C", "demo.types2.D", "demo.types2.E",
        "demo.types2.F", "demo.types2.G", "demo.types2.H", "demo.types2.I", "demo.types2.J",
    ],
    [
        "demo.types3.A", "demo.types3.B", "demo.types3.C", "demo.types3.D", "demo.types3.E",
        "demo.types3.F", "demo.types3.G", "demo.types3.H", "demo.types3.I", "demo.types3.J",
    ],
    [
        "demo.types4.A", "demo.types4.B", "demo.types4.C", "demo.types4.D", "demo.types4.E",
        "demo.types4.F", "demo.types4.G", "demo.types4.H", "demo.types4.I", "demo.types4.J",
    ],
    [
        "demo.types5.A", "demo.types5.B", "demo.types5.C", "demo.types5.D", "demo.types5.E",
        "demo.types5.F", "demo.types5.G", "demo.types5.H", "demo.types5.I", "demo.types5.J",
    ],
];

#[derive(Debug, Deserialize)]
pub struct AllocParams {
    /// Size of the big byte buffer in MiB (default 10).
    pub mb: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocResponse {
    pub requested_bytes: u64,
    pub types: usize,
}

// ─── GET /api/test/alloc ─────────────────────────────────────────
/// One big byte buffer plus a hundred mid-sized char buffers.

pub async fn alloc(Query(params): Query<AllocParams>) -> Result<Json<AllocResponse>, AppError> {
    let mb = params.mb.unwrap_or(10);
    if mb == 0 || mb > MAX_DEMO_MB {
        return Err(AppError::BadRequest(format!(
            "mb must be between 1 and {MAX_DEMO_MB}"
        )));
    }

    let mut requested = 0u64;
    {
        let _label = label_allocations("demo.Bytes");
        let bytes = vec![0u8; mb * 1024 * 1024];
        requested += bytes.len() as u64;
        black_box(bytes);
    }
    {
        let _label = label_allocations("demo.Chars");
        for i in 0..100 {
            let chars = vec!['x'; 20_000 + i];
            requested += (chars.len() * std::mem::size_of::<char>()) as u64;
            black_box(chars);
        }
    }

    tokio::time::sleep(Duration::from_millis(10)).await;

    Ok(Json(AllocResponse {
        requested_bytes: requested,
        types: 2,
    }))
}

// ─── GET /api/test/alloc-multi-namespace ─────────────────────────
/// Fifty labelled arrays spread over five namespaces.

pub async fn alloc_multi_namespace() -> Json<AllocResponse> {
    let mut requested = 0u64;
    for namespace in &MULTI_TYPES {
        for &type_name in namespace {
            let _label = label_allocations(type_name);
            let array = vec![1u8; MULTI_ARRAY_LEN];
            requested += array.len() as u64;
            black_box(array);
        }
    }

    tokio::time::sleep(Duration::from_millis(10)).await;

    Json(AllocResponse {
        requested_bytes: requested,
        types: MULTI_TYPES.len() * MULTI_TYPES[0].len(),
    })
}
