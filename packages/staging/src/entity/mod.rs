pub mod dead_letter_entry;
pub mod playback_event;
pub mod wal_record;
