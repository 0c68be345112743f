use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staybook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staybook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Counter: requests refused for a missing or foreign identity.
pub const AUTH_FAILURES_TOTAL: &str = "staybook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: submissions, availability checks or finalizes refused because the
/// dates were taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "staybook_booking_conflicts_total";

/// Counter: bookings that became paid.
pub const BOOKINGS_RESERVED_TOTAL: &str = "staybook_bookings_reserved_total";

/// Counter: payment intents created or re-priced. Labels: op (create, update).
pub const PAYMENT_INTENTS_TOTAL: &str = "staybook_payment_intents_total";

/// Counter: unpaid bookings removed by the TTL sweep.
pub const PENDING_BOOKINGS_REAPED_TOTAL: &str = "staybook_pending_bookings_reaped_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SubmitDraft { .. } => "submit_draft",
        Command::FinalizeBooking { .. } => "finalize_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBlockedDays { .. } => "select_blocked_days",
        Command::InsertHotel { .. } => "insert_hotel",
        Command::UpdateHotel { .. } => "update_hotel",
        Command::DeleteHotel { .. } => "delete_hotel",
        Command::SelectHotels => "select_hotels",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
    }
}
