use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use staybook::engine::{Engine, EngineSettings};
use staybook::payment::SandboxProcessor;
use staybook::wire;

const PASSWORD: &str = "staybook";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<SandboxProcessor>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("staybook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let processor = Arc::new(SandboxProcessor::new());
    let engine = Arc::new(
        Engine::new(
            dir.join("staybook.wal"),
            processor.clone(),
            EngineSettings::default(),
        )
        .unwrap(),
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), None).await;
            });
        }
    });

    (addr, processor)
}

async fn connect(addr: SocketAddr, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("staybook")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn affected(messages: &[SimpleQueryMessage]) -> Option<u64> {
    messages.iter().find_map(|m| match m {
        SimpleQueryMessage::CommandComplete(n) => Some(*n),
        _ => None,
    })
}

async fn query_rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

async fn sqlstate(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("no SQLSTATE on {err}"))
}

struct Listing {
    hotel_id: String,
    room_id: String,
}

/// One hotel owned by `owner_1` with one room at 100.00/night, breakfast 20.00.
async fn create_listing(owner: &tokio_postgres::Client) -> Listing {
    let hotel = query_rows(
        owner,
        "INSERT INTO hotels (title, country, city, amenities) \
         VALUES ('Harbour View', 'PT', 'Lisbon', 'pool, wifi')",
    )
    .await;
    assert_eq!(hotel.len(), 1);
    assert_eq!(hotel[0].get("owner_id"), Some("owner_1"));
    let hotel_id = hotel[0].get("id").unwrap().to_string();

    let room = query_rows(
        owner,
        &format!(
            "INSERT INTO rooms (hotel_id, title, nightly_rate, breakfast_rate, guest_count, bed_count) \
             VALUES ('{hotel_id}', 'Double', 100, 20, 2, 1)"
        ),
    )
    .await;
    assert_eq!(room[0].get("nightly_rate"), Some("100.00"));
    let room_id = room[0].get("id").unwrap().to_string();

    Listing { hotel_id, room_id }
}

fn draft_sql(listing: &Listing, start: &str, end: &str, breakfast: bool, total: &str) -> String {
    format!(
        "INSERT INTO payment_intents (room_id, hotel_id, hotel_owner_id, start_date, end_date, \
         breakfast_included, total_price) VALUES ('{}', '{}', 'owner_1', '{start}', '{end}', \
         {breakfast}, {total})",
        listing.room_id, listing.hotel_id
    )
}

fn finalize_sql(intent: &str) -> String {
    format!("UPDATE bookings SET payment_status = true WHERE payment_intent_id = '{intent}'")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn checkout_round_trip() {
    let (addr, processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let guest = connect(addr, "guest_1").await;
    let listing = create_listing(&owner).await;

    let checkout = query_rows(
        &guest,
        &draft_sql(&listing, "2090-01-10", "2090-01-13", true, "360.00"),
    )
    .await;
    assert_eq!(checkout.len(), 1);
    assert_eq!(checkout[0].get("amount"), Some("360.00"));
    assert_eq!(checkout[0].get("currency"), Some("usd"));
    assert_eq!(checkout[0].get("revised"), Some("f"));
    let intent = checkout[0].get("payment_intent_id").unwrap().to_string();
    assert_eq!(processor.intent(&intent).unwrap().amount, 36_000);

    let done = guest.simple_query(&finalize_sql(&intent)).await.unwrap();
    assert_eq!(affected(&done), Some(1));
    let again = guest.simple_query(&finalize_sql(&intent)).await.unwrap();
    assert_eq!(affected(&again), Some(0));

    let mine = query_rows(&guest, "SELECT * FROM bookings WHERE user_id = 'guest_1'").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("payment_status"), Some("t"));
    assert_eq!(mine[0].get("total_price"), Some("360.00"));
    assert_eq!(mine[0].get("start_date"), Some("2090-01-10"));
}

#[tokio::test]
async fn resubmit_with_intent_revises_the_booking() {
    let (addr, processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let guest = connect(addr, "guest_1").await;
    let listing = create_listing(&owner).await;

    let first = query_rows(
        &guest,
        &draft_sql(&listing, "2090-02-01", "2090-02-03", false, "200"),
    )
    .await;
    let intent = first[0].get("payment_intent_id").unwrap().to_string();

    let revised_sql = format!(
        "INSERT INTO payment_intents (room_id, hotel_id, hotel_owner_id, start_date, end_date, \
         breakfast_included, total_price, payment_intent_id) VALUES ('{}', '{}', 'owner_1', \
         '2090-02-01', '2090-02-03', true, 240, '{intent}')",
        listing.room_id, listing.hotel_id
    );
    let second = query_rows(&guest, &revised_sql).await;
    assert_eq!(second[0].get("payment_intent_id"), Some(intent.as_str()));
    assert_eq!(second[0].get("revised"), Some("t"));
    assert_eq!(processor.intent(&intent).unwrap().amount, 24_000);

    let mine = query_rows(&guest, "SELECT * FROM bookings WHERE user_id = 'guest_1'").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("total_price"), Some("240.00"));
    assert_eq!(mine[0].get("breakfast_included"), Some("t"));
}

#[tokio::test]
async fn taken_dates_report_conflict_sqlstate() {
    let (addr, _processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;
    let listing = create_listing(&owner).await;

    let a = query_rows(
        &alice,
        &draft_sql(&listing, "2090-01-10", "2090-01-15", false, "500"),
    )
    .await;
    let b = query_rows(
        &bob,
        &draft_sql(&listing, "2090-01-15", "2090-01-17", false, "200"),
    )
    .await;
    let a_intent = a[0].get("payment_intent_id").unwrap().to_string();
    let b_intent = b[0].get("payment_intent_id").unwrap().to_string();

    alice.simple_query(&finalize_sql(&a_intent)).await.unwrap();

    let check = format!(
        "SELECT * FROM availability WHERE room_id = '{}' AND start_date = '2090-01-15' \
         AND end_date = '2090-01-17'",
        listing.room_id
    );
    assert_eq!(sqlstate(&bob, &check).await, "23P01");
    assert_eq!(sqlstate(&bob, &finalize_sql(&b_intent)).await, "23P01");

    let free = format!(
        "SELECT * FROM availability WHERE room_id = '{}' AND start_date = '2090-01-16' \
         AND end_date = '2090-01-17'",
        listing.room_id
    );
    let ok = query_rows(&bob, &free).await;
    assert_eq!(ok[0].get("available"), Some("t"));

    let blocked = query_rows(
        &bob,
        &format!("SELECT * FROM blocked_days WHERE room_id = '{}'", listing.room_id),
    )
    .await;
    let days: Vec<&str> = blocked.iter().filter_map(|r| r.get("day")).collect();
    assert_eq!(
        days,
        ["2090-01-10", "2090-01-11", "2090-01-12", "2090-01-13", "2090-01-14", "2090-01-15"]
    );
}

#[tokio::test]
async fn error_codes() {
    let (addr, _processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let guest = connect(addr, "guest_1").await;
    let listing = create_listing(&owner).await;

    assert_eq!(sqlstate(&guest, &finalize_sql("pi_missing")).await, "P0002");
    assert_eq!(
        sqlstate(&guest, &draft_sql(&listing, "2090-03-01", "2090-03-04", false, "1.00")).await,
        "22023"
    );
    assert_eq!(
        sqlstate(&guest, "SELECT * FROM bookings WHERE user_id = 'someone_else'").await,
        "42501"
    );
    assert_eq!(
        sqlstate(
            &guest,
            &format!("UPDATE rooms SET nightly_rate = 1 WHERE id = '{}'", listing.room_id)
        )
        .await,
        "42501"
    );
    assert_eq!(sqlstate(&guest, "SELEKT nonsense").await, "42601");
    assert_eq!(sqlstate(&guest, "SELECT * FROM spaceships").await, "42601");
}

#[tokio::test]
async fn owner_manages_hotel_and_sees_bookings() {
    let (addr, _processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let guest = connect(addr, "guest_1").await;
    let listing = create_listing(&owner).await;

    let updated = query_rows(
        &owner,
        &format!(
            "UPDATE rooms SET nightly_rate = 150, title = 'Deluxe Double' WHERE id = '{}'",
            listing.room_id
        ),
    )
    .await;
    assert_eq!(updated[0].get("nightly_rate"), Some("150.00"));
    assert_eq!(updated[0].get("breakfast_rate"), Some("20.00"));

    let rooms = query_rows(
        &guest,
        &format!("SELECT * FROM rooms WHERE hotel_id = '{}'", listing.hotel_id),
    )
    .await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].get("title"), Some("Deluxe Double"));

    let hotels = query_rows(&guest, "SELECT * FROM hotels").await;
    assert_eq!(hotels.len(), 1);
    assert_eq!(hotels[0].get("room_count"), Some("1"));

    query_rows(
        &guest,
        &draft_sql(&listing, "2090-04-01", "2090-04-02", false, "150"),
    )
    .await;

    let by_owner =
        query_rows(&owner, "SELECT * FROM bookings WHERE hotel_owner_id = 'owner_1'").await;
    assert_eq!(by_owner.len(), 1);
    assert_eq!(by_owner[0].get("user_id"), Some("guest_1"));

    let by_hotel = query_rows(
        &owner,
        &format!("SELECT * FROM bookings WHERE hotel_id = '{}'", listing.hotel_id),
    )
    .await;
    assert_eq!(by_hotel.len(), 1);

    let booking_id = by_owner[0].get("id").unwrap().to_string();
    let deleted = owner
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{booking_id}'"))
        .await
        .unwrap();
    assert_eq!(affected(&deleted), Some(1));

    owner
        .simple_query(&format!("DELETE FROM hotels WHERE id = '{}'", listing.hotel_id))
        .await
        .unwrap();
    assert!(query_rows(&guest, "SELECT * FROM hotels").await.is_empty());
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _processor) = start_test_server().await;
    let owner = connect(addr, "owner_1").await;
    let listing = create_listing(&owner).await;

    let rows = owner
        .query(
            "SELECT * FROM rooms WHERE hotel_id = $1",
            &[&listing.hotel_id],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: String = rows[0].get("id");
    assert_eq!(id, listing.room_id);

    let rows = owner
        .query(
            "INSERT INTO hotels (title, country, city) VALUES ($1, $2, $3)",
            &[&"Harbour Inn", &"PT", &"Porto $1 district"],
        )
        .await
        .unwrap();
    let title: String = rows[0].get("title");
    let city: Option<String> = rows[0].get("city");
    assert_eq!(title, "Harbour Inn");
    assert_eq!(city.as_deref(), Some("Porto $1 district"));
}
