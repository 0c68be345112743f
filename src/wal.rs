use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Returns the number of bytes written.
fn encode_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// One record and its size on disk. `Ok(None)` on a clean end of file or an
/// unusable trailing frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + 8)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Intact records and the byte offset just past the last of them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, size)) = read_frame(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only event log for the booking store.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little endian. A
/// record cut short by a crash, or failing its checksum, ends replay; the
/// records before it are kept and everything after them is cut off when the
/// log is reopened, so new appends land right after the last intact record.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// Bytes made durable by the last successful `flush_sync`.
    synced_len: u64,
    buffered_len: u64,
    synced_appends: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Replay the log, cut any torn tail and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let writer = open_append(path)?;
        let file_len = writer.get_ref().metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded = file_len - valid_len,
                "truncating torn WAL tail"
            );
            writer.get_ref().set_len(valid_len)?;
            writer.get_ref().sync_all()?;
        }
        let wal = Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            synced_len: valid_len,
            buffered_len: 0,
            synced_appends: 0,
        };
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.buffered_len += encode_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.buffered_len;
        self.buffered_len = 0;
        self.synced_appends = self.appends_since_compact;
        Ok(())
    }

    /// Throw away everything appended since the last successful `flush_sync`,
    /// both the unflushed buffer and any bytes that already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        let (file, _unflushed) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.buffered_len = 0;
        self.appends_since_compact = self.synced_appends;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot next to the log and fsync it. The live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        self.writer = open_append(&self.path)?;
        self.synced_len = self.writer.get_ref().metadata()?.len();
        self.buffered_len = 0;
        self.appends_since_compact = 0;
        self.synced_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact record in the log, in append order. A missing file is empty.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn hotel_created() -> Event {
        Event::HotelCreated {
            hotel: Hotel {
                id: Ulid::new(),
                owner_id: UserId::new("owner").unwrap(),
                title: "Inn".into(),
                country: "NO".into(),
                state: None,
                city: None,
                amenities: vec![],
                image_url: None,
            },
        }
    }

    fn booking_opened(room_id: Ulid) -> Event {
        let day = |d| NaiveDate::from_ymd_opt(2090, 6, d).unwrap();
        Event::BookingOpened {
            booking: Booking {
                id: Ulid::new(),
                room_id,
                hotel_id: Ulid::new(),
                hotel_owner_id: UserId::new("owner").unwrap(),
                user_id: UserId::new("guest").unwrap(),
                stay: DayRange::new(day(1), day(4)),
                total_price: 30_000,
                breakfast_included: false,
                currency: "usd".into(),
                payment_intent_id: "pi_1".into(),
                payment_status: false,
                booked_at: 0,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let room_id = Ulid::new();
        let events = vec![
            hotel_created(),
            booking_opened(room_id),
            Event::BookingPaid {
                id: Ulid::new(),
                room_id,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let event = hotel_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn reopen_cuts_torn_tail_before_appending() {
        let path = tmp_path("torn_reopen.wal");
        let first = hotel_created();
        let second = hotel_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }

        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn rollback_discards_unsynced_records() {
        let path = tmp_path("rollback.wal");
        let kept = hotel_created();
        let third = hotel_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            wal.append_buffered(&hotel_created()).unwrap();
            wal.append_buffered(&hotel_created()).unwrap();
            assert_eq!(wal.appends_since_compact(), 3);

            wal.rollback().unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
            wal.append(&third).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, third]);
    }

    #[test]
    fn rollback_truncates_bytes_already_on_disk() {
        let path = tmp_path("rollback_on_disk.wal");
        let kept = hotel_created();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let synced = fs::metadata(&path).unwrap().len();

        wal.append_buffered(&hotel_created()).unwrap();
        wal.writer.flush().unwrap();
        assert!(fs::metadata(&path).unwrap().len() > synced);

        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), synced);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = hotel_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&hotel_created()).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_rejects_absurd_frame_length() {
        let path = tmp_path("absurd_len.wal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let room_id = Ulid::new();
        let snapshot = vec![hotel_created()];

        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..20 {
                let opened = booking_opened(room_id);
                let Event::BookingOpened { booking } = &opened else {
                    unreachable!()
                };
                let removed = Event::BookingRemoved {
                    id: booking.id,
                    room_id,
                    reason: RemovalReason::Abandoned,
                };
                wal.append(&opened).unwrap();
                wal.append(&removed).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 40);
        }
        let before = fs::metadata(&path).unwrap().len();

        let after_event = booking_opened(room_id);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&after_event).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");
        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![snapshot[0].clone(), after_event]
        );
    }

    #[test]
    fn buffered_appends_become_durable_on_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| hotel_created()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
