use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use sysinfo::System;
use tracing::info;

use crate::auth::auth;
use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::services::auth_service::CallerIdentity;
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Connection, session and host statistics
pub async fn diagnostics(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_admin(&identity, &app_state.config.admin_role)?;

    let stats = app_state.registry.stats();
    let n_conn = app_state.connections.load(Ordering::Relaxed);
    let n_rooms = app_state.fanout.room_count().await as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Sessions: {}, Rooms: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        stats.sessions,
        n_rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_sessions: stats.sessions,
            n_participants: stats.participants,
            n_dirty_docs: stats.dirty,
            n_pending_persists: stats.pending_persists,
            n_rooms,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
