use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Session, StaybookAuthSource};
use crate::engine::{yesterday, Checkout, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command, SqlError};

pub struct StaybookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<StaybookQueryParser>,
}

impl StaybookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(StaybookQueryParser),
        }
    }

    /// The login user name is the caller's identity.
    fn session<C: ClientInfo>(client: &C) -> Session {
        Session::from_login(client.metadata().get("user").map(String::as_str))
    }

    async fn run(&self, session: &Session, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(session, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        session: &Session,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::SubmitDraft {
                draft,
                payment_intent_id,
            } => {
                let checkout = engine
                    .submit_booking_draft(session, draft, payment_intent_id.as_deref())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(checkout_schema());
                let row = encode_checkout(&schema, &checkout);
                Ok(vec![query_response(schema, vec![row])])
            }
            Command::FinalizeBooking { payment_intent_id } => {
                let finalized = engine
                    .finalize_booking(session, &payment_intent_id)
                    .await
                    .map_err(engine_err)?;
                let rows = usize::from(finalized.newly_reserved);
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(rows))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(session, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Room(room_id) => {
                        engine.bookings_for_room(session, room_id, yesterday()).await
                    }
                    BookingFilter::Hotel(hotel_id) => {
                        engine.bookings_for_hotel(session, hotel_id, yesterday()).await
                    }
                    BookingFilter::Owner(owner) => engine.bookings_for_owner(session, &owner).await,
                    BookingFilter::Guest(guest) => engine.bookings_for_guest(session, &guest).await,
                }
                .map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows = bookings
                    .iter()
                    .map(|b| encode_booking(&schema, b))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectAvailability { room_id, stay } => {
                engine
                    .check_availability_before_confirm(session, room_id, stay)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&true)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::SelectBlockedDays { room_id } => {
                if engine.get_room(&room_id).is_none() {
                    return Err(engine_err(EngineError::not_found("room", room_id)));
                }
                let days = engine.blocked_days_for_room(room_id, yesterday()).await;
                let schema = Arc::new(blocked_days_schema());
                let rid = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|day| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid)?;
                        encoder.encode_field(&day.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::InsertHotel {
                id,
                title,
                country,
                state,
                city,
                amenities,
                image_url,
            } => {
                let owner_id = session.require_user().map_err(engine_err)?.clone();
                let hotel = Hotel {
                    id,
                    owner_id,
                    title,
                    country,
                    state,
                    city,
                    amenities,
                    image_url,
                };
                let hotel = engine.create_hotel(session, hotel).await.map_err(engine_err)?;
                Ok(vec![hotel_response(HotelInfo {
                    hotel,
                    room_count: 0,
                })])
            }
            Command::UpdateHotel { id, patch } => {
                let hotel = engine
                    .update_hotel(session, id, patch)
                    .await
                    .map_err(engine_err)?;
                let room_count = engine.rooms_for_hotel(id).await.len();
                Ok(vec![hotel_response(HotelInfo { hotel, room_count })])
            }
            Command::DeleteHotel { id } => {
                engine.delete_hotel(session, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectHotels => {
                let schema = Arc::new(hotel_schema());
                let rows = engine
                    .list_hotels()
                    .iter()
                    .map(|h| encode_hotel(&schema, h))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::InsertRoom { room } => {
                let room = engine.create_room(session, room).await.map_err(engine_err)?;
                Ok(vec![room_response(&room)])
            }
            Command::UpdateRoom { id, patch } => {
                let room = engine
                    .update_room(session, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![room_response(&room)])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(session, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms { hotel_id } => {
                if engine.get_hotel(&hotel_id).is_none() {
                    return Err(engine_err(EngineError::not_found("hotel", hotel_id)));
                }
                let schema = Arc::new(room_schema());
                let rows = engine
                    .rooms_for_hotel(hotel_id)
                    .await
                    .iter()
                    .map(|r| encode_room(&schema, r))
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
        }
    }
}

/// Owner and guest listings only ever show the caller's own bookings.
// ── Row schemas ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn checkout_schema() -> Vec<FieldInfo> {
    vec![
        field("booking_id", Type::VARCHAR),
        field("payment_intent_id", Type::VARCHAR),
        field("client_secret", Type::VARCHAR),
        field("amount", Type::VARCHAR),
        field("currency", Type::VARCHAR),
        field("revised", Type::BOOL),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("hotel_id", Type::VARCHAR),
        field("hotel_owner_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("total_price", Type::VARCHAR),
        field("breakfast_included", Type::BOOL),
        field("currency", Type::VARCHAR),
        field("payment_intent_id", Type::VARCHAR),
        field("payment_status", Type::BOOL),
        field("booked_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("room_id", Type::VARCHAR), field("available", Type::BOOL)]
}

fn blocked_days_schema() -> Vec<FieldInfo> {
    vec![field("room_id", Type::VARCHAR), field("day", Type::VARCHAR)]
}

fn hotel_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("country", Type::VARCHAR),
        field("state", Type::VARCHAR),
        field("city", Type::VARCHAR),
        field("amenities", Type::VARCHAR),
        field("image_url", Type::VARCHAR),
        field("room_count", Type::INT8),
    ]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("hotel_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("nightly_rate", Type::VARCHAR),
        field("breakfast_rate", Type::VARCHAR),
        field("guest_count", Type::INT8),
        field("bed_count", Type::INT8),
        field("amenities", Type::VARCHAR),
        field("image_url", Type::VARCHAR),
    ]
}

/// Result columns of a statement, from its verb and table. Used by Describe,
/// where bound parameters aren't known yet.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let table_after = |kw: &str| {
        words
            .iter()
            .position(|w| *w == kw)
            .and_then(|i| words.get(i + 1))
            .copied()
    };

    match words.first().copied() {
        Some("select") => match table_after("from") {
            Some("bookings") => booking_schema(),
            Some("availability") => availability_schema(),
            Some("blocked_days") => blocked_days_schema(),
            Some("hotels") => hotel_schema(),
            Some("rooms") => room_schema(),
            _ => vec![],
        },
        Some("insert") => match table_after("into") {
            Some("payment_intents") => checkout_schema(),
            Some("hotels") => hotel_schema(),
            Some("rooms") => room_schema(),
            _ => vec![],
        },
        Some("update") => match words.get(1).copied() {
            Some("hotels") => hotel_schema(),
            Some("rooms") => room_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

/// Minor units as a decimal with two places, e.g. `36000` -> `"360.00"`.
pub fn format_money(amount: Money) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_checkout(schema: &Arc<Vec<FieldInfo>>, checkout: &Checkout) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&checkout.booking_id.to_string())?;
    encoder.encode_field(&checkout.intent.id)?;
    encoder.encode_field(&checkout.intent.client_secret)?;
    encoder.encode_field(&format_money(checkout.intent.amount))?;
    encoder.encode_field(&checkout.intent.currency)?;
    encoder.encode_field(&checkout.revised)?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.hotel_id.to_string())?;
    encoder.encode_field(&b.hotel_owner_id.to_string())?;
    encoder.encode_field(&b.user_id.to_string())?;
    encoder.encode_field(&b.stay.start.to_string())?;
    encoder.encode_field(&b.stay.end.to_string())?;
    encoder.encode_field(&format_money(b.total_price))?;
    encoder.encode_field(&b.breakfast_included)?;
    encoder.encode_field(&b.currency)?;
    encoder.encode_field(&b.payment_intent_id)?;
    encoder.encode_field(&b.payment_status)?;
    encoder.encode_field(&b.booked_at)?;
    Ok(encoder.take_row())
}

fn encode_hotel(schema: &Arc<Vec<FieldInfo>>, info: &HotelInfo) -> PgWireResult<DataRow> {
    let h = &info.hotel;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&h.id.to_string())?;
    encoder.encode_field(&h.owner_id.to_string())?;
    encoder.encode_field(&h.title)?;
    encoder.encode_field(&h.country)?;
    encoder.encode_field(&h.state)?;
    encoder.encode_field(&h.city)?;
    encoder.encode_field(&h.amenities.join(", "))?;
    encoder.encode_field(&h.image_url)?;
    encoder.encode_field(&(info.room_count as i64))?;
    Ok(encoder.take_row())
}

fn encode_room(schema: &Arc<Vec<FieldInfo>>, r: &Room) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.hotel_id.to_string())?;
    encoder.encode_field(&r.title)?;
    encoder.encode_field(&format_money(r.nightly_rate))?;
    encoder.encode_field(&r.breakfast_rate.map(format_money))?;
    encoder.encode_field(&i64::from(r.guest_count))?;
    encoder.encode_field(&i64::from(r.bed_count))?;
    encoder.encode_field(&r.amenities.join(", "))?;
    encoder.encode_field(&r.image_url)?;
    Ok(encoder.take_row())
}

fn hotel_response(info: HotelInfo) -> Response {
    let schema = Arc::new(hotel_schema());
    let row = encode_hotel(&schema, &info);
    query_response(schema, vec![row])
}

fn room_response(room: &Room) -> Response {
    let schema = Arc::new(room_schema());
    let row = encode_room(&schema, room);
    query_response(schema, vec![row])
}

#[async_trait]
impl SimpleQueryHandler for StaybookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = Self::session(client);
        self.run(&session, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaybookQueryParser;

#[async_trait]
impl QueryParser for StaybookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaybookHandler {
    type Statement = String;
    type QueryParser = StaybookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = Self::session(client);
        let sql = substitute_params(portal);
        let mut responses = self.run(&session, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Every `$N` placeholder outside quoted literals: its byte range and N.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals. One pass over the
/// statement; values are copied into the output and never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StaybookFactory {
    handler: Arc<StaybookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<StaybookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl StaybookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(StaybookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                StaybookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaybookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(StaybookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Unauthorized => "28000",
        EngineError::Forbidden(_) | EngineError::ListingForbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::AlreadyFinalized(_) => "55000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Payment(_) | EngineError::WalError(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if matches!(
        e,
        EngineError::Unauthorized | EngineError::Forbidden(_) | EngineError::ListingForbidden(_)
    ) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
    }
    if e.is_external() {
        tracing::error!("external service error: {e}");
        return user_error(
            sqlstate(&e),
            "the booking service is temporarily unavailable, please retry".into(),
        );
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn money_formats_with_two_places() {
        assert_eq!(format_money(36_000), "360.00");
        assert_eq!(format_money(5), "0.05");
        assert_eq!(format_money(-1_250), "-12.50");
    }

    #[test]
    fn every_engine_error_has_its_own_sqlstate() {
        let stay = DayRange::new(
            NaiveDate::from_ymd_opt(2090, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2090, 1, 2).unwrap(),
        );
        let errors = [
            EngineError::Unauthorized,
            EngineError::Forbidden(Ulid::nil()),
            EngineError::NotFound("x".into()),
            EngineError::Validation("x".into()),
            EngineError::Conflict {
                room_id: Ulid::nil(),
                stay,
            },
            EngineError::AlreadyFinalized(Ulid::nil()),
            EngineError::AlreadyExists(Ulid::nil()),
            EngineError::LimitExceeded("x"),
            EngineError::WalError("x".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(sqlstate).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(sqlstate(&errors[4]), "23P01");
        let listing = EngineError::ListingForbidden(UserId::new("bob").unwrap());
        assert_eq!(sqlstate(&listing), sqlstate(&errors[1]));
    }

    #[test]
    fn statement_schema_follows_table() {
        let names = |sql: &str| -> Vec<String> {
            statement_schema(sql)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(names("SELECT * FROM availability WHERE room_id = $1")[1], "available");
        assert_eq!(names("select * from blocked_days where room_id = $1")[1], "day");
        assert_eq!(
            names("INSERT INTO payment_intents (room_id) VALUES ($1)")[0],
            "booking_id"
        );
        assert_eq!(names("UPDATE rooms SET title = $1 WHERE id = $2")[0], "id");
        assert!(names("UPDATE bookings SET payment_status = true").is_empty());
        assert!(names("DELETE FROM hotels WHERE id = $1").is_empty());
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("WHERE a = $1 AND b = $12 AND c = $3"), 12);
        assert_eq!(count_params("WHERE price = '$'"), 0);
        assert_eq!(count_params("WHERE title = '$4' AND id = $2"), 2);
    }

    fn bind(sql: &str, params: &[Option<&str>]) -> String {
        bind_params(sql, params)
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = bind(
            "INSERT INTO hotels (title, country, city) VALUES ($1, $2, $3)",
            &[Some("Harbour Inn"), Some("PT"), Some("Porto $1 district")],
        );
        assert!(sql.ends_with("VALUES ('Harbour Inn', 'PT', 'Porto $1 district')"));
        assert!(matches!(
            sql::parse_sql(&sql),
            Ok(Command::InsertHotel { city: Some(city), .. }) if city == "Porto $1 district"
        ));
    }

    #[test]
    fn binding_quotes_nulls_and_two_digit_indexes() {
        let params: Vec<Option<&str>> = (1..=10)
            .map(|i| if i == 2 { None } else { Some("x") })
            .collect();
        assert_eq!(bind("$10 $1 $2", &params), "'x' 'x' NULL");
        assert_eq!(bind("a = $1", &[Some("O'Brien")]), "a = 'O''Brien'");
        assert_eq!(bind("a = '$1' AND b = $1", &[Some("v")]), "a = '$1' AND b = 'v'");
        assert_eq!(bind("a = $3", &[Some("v")]), "a = $3");
    }
}
