use chrono::{DateTime, NaiveDate, Utc};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use ulid::Ulid;

use crate::limits::MAX_USER_ID_LEN;
use crate::model::*;

/// Which bookings a `SELECT ... FROM bookings` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingFilter {
    Room(Ulid),
    Hotel(Ulid),
    Owner(UserId),
    Guest(UserId),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SubmitDraft {
        draft: BookingDraft,
        payment_intent_id: Option<String>,
    },
    FinalizeBooking {
        payment_intent_id: String,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        room_id: Ulid,
        stay: DayRange,
    },
    SelectBlockedDays {
        room_id: Ulid,
    },
    InsertHotel {
        id: Ulid,
        title: String,
        country: String,
        state: Option<String>,
        city: Option<String>,
        amenities: Vec<String>,
        image_url: Option<String>,
    },
    UpdateHotel {
        id: Ulid,
        patch: HotelPatch,
    },
    DeleteHotel {
        id: Ulid,
    },
    SelectHotels,
    InsertRoom {
        room: Room,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        hotel_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == ';') {
        return Err(SqlError::Empty);
    }
    if trimmed
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("update"))
    {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    match stmts.first() {
        None => Err(SqlError::Empty),
        Some(Statement::Insert(insert)) => parse_insert(insert),
        Some(Statement::Delete(delete)) => parse_delete(delete),
        Some(Statement::Query(query)) => parse_select(query),
        Some(other) => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by the INSERT's column list.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }

    /// Absent and NULL both read as `None`.
    fn optional(&self, col: &str) -> Option<&Expr> {
        self.get(col).filter(|e| !is_null(e))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = insert_row(insert)?;

    match table.as_str() {
        "payment_intents" => {
            let draft = BookingDraft {
                room_id: parse_ulid(row.required("room_id")?)?,
                hotel_id: parse_ulid(row.required("hotel_id")?)?,
                hotel_owner_id: parse_user_id(row.required("hotel_owner_id")?)?,
                stay: parse_stay(row.required("start_date")?, row.required("end_date")?)?,
                breakfast_included: row
                    .optional("breakfast_included")
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(false),
                total_price: parse_money(row.required("total_price")?)?,
            };
            let payment_intent_id = row
                .optional("payment_intent_id")
                .map(parse_string)
                .transpose()?;
            Ok(Command::SubmitDraft {
                draft,
                payment_intent_id,
            })
        }
        "hotels" => Ok(Command::InsertHotel {
            id: row.optional("id").map(parse_ulid).transpose()?.unwrap_or_else(Ulid::new),
            title: parse_string(row.required("title")?)?,
            country: parse_string(row.required("country")?)?,
            state: row.optional("state").map(parse_string).transpose()?,
            city: row.optional("city").map(parse_string).transpose()?,
            amenities: row
                .optional("amenities")
                .map(parse_list)
                .transpose()?
                .unwrap_or_default(),
            image_url: row.optional("image_url").map(parse_string).transpose()?,
        }),
        "rooms" => Ok(Command::InsertRoom {
            room: Room {
                id: row.optional("id").map(parse_ulid).transpose()?.unwrap_or_else(Ulid::new),
                hotel_id: parse_ulid(row.required("hotel_id")?)?,
                title: parse_string(row.required("title")?)?,
                nightly_rate: parse_money(row.required("nightly_rate")?)?,
                breakfast_rate: row.optional("breakfast_rate").map(parse_money).transpose()?,
                guest_count: row.optional("guest_count").map(parse_u32).transpose()?.unwrap_or(1),
                bed_count: row.optional("bed_count").map(parse_u32).transpose()?.unwrap_or(1),
                amenities: row
                    .optional("amenities")
                    .map(parse_list)
                    .transpose()?
                    .unwrap_or_default(),
                image_url: row.optional("image_url").map(parse_string).transpose()?,
            },
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn insert_row(insert: &ast::Insert) -> Result<Row, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [only] => only,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
    }
    let cells = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(values.iter().cloned())
        .collect();
    Ok(Row { cells })
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE <table> SET col = value[, ...] WHERE <filters>`, read token by
/// token with the sqlparser parser.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;
    parser.expect_keyword(Keyword::UPDATE).map_err(parse_err)?;
    let name = parser.parse_object_name(false).map_err(parse_err)?;
    let table = object_name_last(&name).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    parser.expect_keyword(Keyword::SET).map_err(parse_err)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_err)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_err)?)
    } else {
        None
    };
    parser.consume_token(&Token::SemiColon);
    parser.expect_token(&Token::EOF).map_err(parse_err)?;

    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((col, a.value));
    }
    let row = Row { cells: set };
    let filters = eq_filters(selection.as_ref());

    match table.as_str() {
        "bookings" => {
            let paid = parse_bool(row.required("payment_status")?)?;
            if !paid || row.cells.len() != 1 {
                return Err(SqlError::Unsupported(
                    "bookings can only be updated with SET payment_status = true".into(),
                ));
            }
            let intent = filter(&filters, "payment_intent_id")
                .ok_or(SqlError::MissingFilter("payment_intent_id"))?;
            Ok(Command::FinalizeBooking {
                payment_intent_id: parse_string(intent)?,
            })
        }
        "hotels" => {
            let id = parse_ulid(filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?)?;
            let mut patch = HotelPatch::default();
            for (col, expr) in &row.cells {
                match col.as_str() {
                    "title" => patch.title = Some(parse_string(expr)?),
                    "country" => patch.country = Some(parse_string(expr)?),
                    "state" => patch.state = Some(parse_nullable(expr, parse_string)?),
                    "city" => patch.city = Some(parse_nullable(expr, parse_string)?),
                    "amenities" => patch.amenities = Some(parse_list(expr)?),
                    "image_url" => patch.image_url = Some(parse_nullable(expr, parse_string)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateHotel { id, patch })
        }
        "rooms" => {
            let id = parse_ulid(filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?)?;
            let mut patch = RoomPatch::default();
            for (col, expr) in &row.cells {
                match col.as_str() {
                    "title" => patch.title = Some(parse_string(expr)?),
                    "nightly_rate" => patch.nightly_rate = Some(parse_money(expr)?),
                    "breakfast_rate" => {
                        patch.breakfast_rate = Some(parse_nullable(expr, parse_money)?)
                    }
                    "guest_count" => patch.guest_count = Some(parse_u32(expr)?),
                    "bed_count" => patch.bed_count = Some(parse_u32(expr)?),
                    "amenities" => patch.amenities = Some(parse_list(expr)?),
                    "image_url" => patch.image_url = Some(parse_nullable(expr, parse_string)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE / SELECT ───────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = eq_filters(delete.selection.as_ref());
    let id = parse_ulid(filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?)?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking { id }),
        "hotels" => Ok(Command::DeleteHotel { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = eq_filters(select.selection.as_ref());
    let room_id = || -> Result<Ulid, SqlError> {
        parse_ulid(filter(&filters, "room_id").ok_or(SqlError::MissingFilter("room_id"))?)
    };

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_id: room_id()?,
            stay: parse_stay(
                filter(&filters, "start_date").ok_or(SqlError::MissingFilter("start_date"))?,
                filter(&filters, "end_date").ok_or(SqlError::MissingFilter("end_date"))?,
            )?,
        }),
        "blocked_days" => Ok(Command::SelectBlockedDays { room_id: room_id()? }),
        "bookings" => {
            let filter = if let Some(e) = filter(&filters, "room_id") {
                BookingFilter::Room(parse_ulid(e)?)
            } else if let Some(e) = filter(&filters, "hotel_id") {
                BookingFilter::Hotel(parse_ulid(e)?)
            } else if let Some(e) = filter(&filters, "hotel_owner_id") {
                BookingFilter::Owner(parse_user_id(e)?)
            } else if let Some(e) = filter(&filters, "user_id") {
                BookingFilter::Guest(parse_user_id(e)?)
            } else {
                return Err(SqlError::MissingFilter(
                    "room_id, hotel_id, hotel_owner_id or user_id",
                ));
            };
            Ok(Command::SelectBookings { filter })
        }
        "hotels" => Ok(Command::SelectHotels),
        "rooms" => {
            let hotel_id = filter(&filters, "hotel_id").ok_or(SqlError::MissingFilter("hotel_id"))?;
            Ok(Command::SelectRooms {
                hotel_id: parse_ulid(hotel_id)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs from an AND-only WHERE clause. `>=`/`<=` count as `=`
/// so range-style date filters read naturally.
fn eq_filters(selection: Option<&Expr>) -> Vec<(String, Expr)> {
    fn walk(expr: &Expr, out: &mut Vec<(String, Expr)>) {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    walk(left, out);
                    walk(right, out);
                }
                ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                    if let Some(col) = expr_column_name(left) {
                        out.push((col, right.as_ref().clone()));
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out);
    }
    out
}

fn filter<'a>(filters: &'a [(String, Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| e)
}

// ── Names ─────────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Values ────────────────────────────────────────────────────

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_nullable<T>(
    expr: &Expr,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse(expr).map(Some)
    }
}

/// Literal text of a string or number, with a leading unary minus folded in.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(format!("-{}", literal_text(expr)?));
    }
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_user_id(expr: &Expr) -> Result<UserId, SqlError> {
    let s = parse_string(expr)?;
    if s.len() > MAX_USER_ID_LEN {
        return Err(SqlError::Parse("user id too long".into()));
    }
    UserId::new(s).ok_or_else(|| SqlError::Parse("user id must not be blank".into()))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let s = literal_text(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// Comma-separated text, e.g. `'wifi, pool'`.
fn parse_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    Ok(parse_string(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Decimal amount in major units (`120`, `120.5`, `'120.50'`) to minor units.
pub fn parse_money_str(s: &str) -> Result<Money, SqlError> {
    let bad = || SqlError::Parse(format!("bad amount {s:?}"));
    let (negative, digits) = match s.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.trim()),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(bad());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    if frac.len() > 2 {
        return Err(SqlError::Parse(format!("amount {s:?} has more than two decimals")));
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| bad())? };
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
        _ => frac.parse().map_err(|_| bad())?,
    };
    let minor = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(bad)?;
    Ok(if negative { -minor } else { minor })
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    parse_money_str(&literal_text(expr)?)
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp reduced to its UTC day.
pub fn parse_date_str(s: &str) -> Result<NaiveDate, SqlError> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .map_err(|_| SqlError::Parse(format!("bad date {s:?}")))
}

fn parse_stay(start: &Expr, end: &Expr) -> Result<DayRange, SqlError> {
    let start = parse_date_str(&parse_string(start)?)?;
    let end = parse_date_str(&parse_string(end)?)?;
    if end < start {
        return Err(SqlError::Parse(format!(
            "end_date {end} is before start_date {start}"
        )));
    }
    Ok(DayRange::new(start, end))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
