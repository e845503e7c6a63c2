//! # Corruption Recovery Tests
//!
//! Injected-damage coverage: payload flips, header flips, truncation, and
//! the recovery callback policies. Each test builds a file, breaks it at a
//! chosen byte, and checks that recovery skips exactly what the format
//! promises and nothing more.

use recfile::{
    ErrorKind, ReadError, Recoverable, RecordPosition, RecordReader, RecordWriter, SliceSource,
};

/// One chunk per record group; returns the bytes and each chunk's begin.
fn file_of_chunks(groups: &[&[u8]]) -> (Vec<u8>, Vec<u64>) {
    let mut writer = RecordWriter::new(Vec::new());
    writer.flush().unwrap(); // emit the signature so positions are real
    let mut begins = Vec::new();
    for group in groups {
        begins.push(writer.pos().chunk_begin());
        writer.write_record(group).unwrap();
        writer.flush().unwrap();
    }
    let bytes = writer.finish().unwrap();
    (bytes, begins)
}

fn five_chunk_file() -> (Vec<u8>, Vec<u64>) {
    file_of_chunks(&[
        b"chunk-one-payload",
        b"chunk-two-payload",
        b"chunk-three-payload",
        b"chunk-four-payload",
        b"chunk-five-payload",
    ])
}

mod payload_corruption {
    use super::*;

    #[test]
    fn detected_as_data_loss() {
        let (mut bytes, begins) = five_chunk_file();
        // Flip one byte inside chunk 2's payload (past its 40-byte header).
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"chunk-one-payload");

        let err = reader.read_record().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::DataLoss);
        assert!(!reader.is_healthy());
        // The chunk header was intact, so the damage sits at the chunk
        // reader, which knows the chunk's exact extent.
        assert_eq!(reader.recoverable(), Recoverable::ChunkReader);
    }

    #[test]
    fn recovery_skips_exactly_the_damaged_chunk() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap_err();

        let region = reader.recover().unwrap();
        assert_eq!(region.begin(), begins[1]);
        assert_eq!(region.end(), begins[2]);
        assert!(reader.is_healthy());

        let rest: Vec<Vec<u8>> = std::iter::from_fn(|| {
            reader.read_record().unwrap().map(|r| r.to_vec())
        })
        .collect();
        assert_eq!(
            rest,
            vec![
                b"chunk-three-payload".to_vec(),
                b"chunk-four-payload".to_vec(),
                b"chunk-five-payload".to_vec(),
            ]
        );
    }

    #[test]
    fn reader_rejects_reads_until_recovered() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap_err();

        // Still failed: the same error surfaces again.
        let err = reader.read_record().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::DataLoss);

        reader.recover().unwrap();
        assert!(reader.read_record().unwrap().is_some());
    }

    #[test]
    fn recovery_preserves_monotonicity() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        let (last_good, _) = reader.read_record_at().unwrap().unwrap();
        reader.read_record().unwrap_err();
        reader.recover().unwrap();

        assert!(reader.pos() > last_good);
        let (next, _) = reader.read_record_at().unwrap().unwrap();
        assert!(next > last_good);
    }
}

mod header_corruption {
    use super::*;

    #[test]
    fn detected_at_the_chunk_reader() {
        let (mut bytes, begins) = five_chunk_file();
        // Flip a byte inside chunk 2's header.
        bytes[begins[1] as usize + 8] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        let err = reader.read_record().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::DataLoss);
        assert_eq!(reader.recoverable(), Recoverable::ChunkReader);
    }

    #[test]
    fn within_one_block_recovery_reaches_eof() {
        // All five chunks live in block 0, so a destroyed header leaves no
        // later re-synchronization point before end-of-file.
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 8] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap_err();

        let region = reader.recover().unwrap();
        assert_eq!(region.begin(), begins[1]);
        assert_eq!(region.end(), bytes.len() as u64);
        assert!(reader.is_healthy());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn block_aligned_chunks_survive_a_destroyed_header() {
        // Padding places chunk 3 at a block boundary, so the scan finds it
        // again after chunk 2's header is destroyed.
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record(b"chunk-one").unwrap();
        writer.flush().unwrap();
        let second = writer.pos().chunk_begin();
        writer.write_record(b"chunk-two").unwrap();
        writer.pad_to_block_boundary().unwrap();
        let third = writer.pos().chunk_begin();
        writer.write_record(b"chunk-three").unwrap();
        let mut bytes = writer.finish().unwrap();
        assert_eq!(third % recfile::chunks::BLOCK_SIZE, 0);

        bytes[second as usize + 8] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"chunk-one");
        reader.read_record().unwrap_err();

        let region = reader.recover().unwrap();
        assert_eq!(region.begin(), second);
        assert_eq!(region.end(), third);
        assert_eq!(reader.read_record().unwrap().unwrap(), b"chunk-three");
        assert!(reader.read_record().unwrap().is_none());
    }
}

mod truncation {
    use super::*;

    #[test]
    fn truncated_final_chunk_reports_and_recovers_to_eof() {
        let (mut bytes, begins) = five_chunk_file();
        bytes.truncate(begins[4] as usize + 20); // inside chunk 5's header

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        for _ in 0..4 {
            assert!(reader.read_record().unwrap().is_some());
        }
        let err = reader.read_record().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::Truncated);
        assert_eq!(reader.recoverable(), Recoverable::ChunkReader);

        let region = reader.recover().unwrap();
        assert_eq!(region.begin(), begins[4]);
        assert_eq!(region.end(), bytes.len() as u64);

        // End-of-file is terminal, not damage: the reader is healthy.
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.is_healthy());
    }

    #[test]
    fn truncated_payload_recovers_to_eof() {
        let (mut bytes, begins) = five_chunk_file();
        bytes.truncate(begins[3] as usize + 50); // inside chunk 4's payload

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        for _ in 0..3 {
            assert!(reader.read_record().unwrap().is_some());
        }
        reader.read_record().unwrap_err();
        let region = reader.recover().unwrap();
        assert_eq!(region.begin(), begins[3]);
        assert_eq!(region.end(), bytes.len() as u64);
        assert!(reader.read_record().unwrap().is_none());
    }
}

mod recovery_callback {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn best_effort_salvage_skips_silently() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;
        bytes[begins[3] as usize + 45] ^= 0x01;

        let regions = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&regions);
        let mut reader = RecordReader::with_options(
            SliceSource::new(&bytes),
            recfile::ReaderOptions::new().recovery(move |region| {
                sink.borrow_mut().push((region.begin(), region.end()));
                true
            }),
        );

        let records: Vec<Vec<u8>> = std::iter::from_fn(|| {
            reader.read_record().unwrap().map(|r| r.to_vec())
        })
        .collect();
        assert_eq!(
            records,
            vec![
                b"chunk-one-payload".to_vec(),
                b"chunk-three-payload".to_vec(),
                b"chunk-five-payload".to_vec(),
            ]
        );
        assert_eq!(
            regions.borrow().as_slice(),
            &[(begins[1], begins[2]), (begins[3], begins[4])]
        );
    }

    #[test]
    fn rejecting_callback_aborts_on_first_corruption() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::with_options(
            SliceSource::new(&bytes),
            recfile::ReaderOptions::new().recovery(|_| false),
        );

        reader.read_record().unwrap().unwrap();
        let err = reader.read_record().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::DataLoss);
        assert!(!reader.is_healthy());
        // The recovery was consumed; the failure is final now.
        assert_eq!(reader.recoverable(), Recoverable::No);
    }

    #[test]
    fn callback_sees_the_failure_reason() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let reason = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&reason);
        let mut reader = RecordReader::with_options(
            SliceSource::new(&bytes),
            recfile::ReaderOptions::new().recovery(move |region| {
                *sink.borrow_mut() = region.reason().to_string();
                true
            }),
        );
        while reader.read_record().unwrap().is_some() {}
        assert!(reason.borrow().contains("hash mismatch"));
    }
}

mod explicit_recover_misuse {
    use super::*;

    #[test]
    fn recover_on_healthy_reader_is_a_precondition_failure() {
        let (bytes, _) = five_chunk_file();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        let err = reader.recover().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::FailedPrecondition);
        // The reader stays usable.
        assert!(reader.read_record().unwrap().is_some());
    }

    #[test]
    fn metadata_read_away_from_start_is_a_precondition_failure() {
        let (bytes, _) = five_chunk_file();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        let err = reader.read_metadata().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::FailedPrecondition);
        assert_eq!(reader.recoverable(), Recoverable::No);
    }
}

mod unparsable_messages {
    use super::*;
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    struct Entry {
        #[prost(string, tag = "1")]
        name: String,
    }

    #[test]
    fn bad_message_is_skippable_at_the_decoder() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write_message(&Entry {
                name: "first".to_string(),
            })
            .unwrap();
        writer.write_record(&[0xFF, 0xFF, 0xFF]).unwrap(); // not a message
        writer
            .write_message(&Entry {
                name: "third".to_string(),
            })
            .unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        assert_eq!(reader.read_message::<Entry>().unwrap().unwrap().name, "first");

        let err = reader.read_message::<Entry>().unwrap_err();
        assert_eq!(ReadError::kind_of(&err), ErrorKind::DataLoss);
        assert_eq!(reader.recoverable(), Recoverable::ChunkDecoder);

        let region = reader.recover().unwrap();
        // Exactly the bad record's position space.
        assert_eq!(region.end() - region.begin(), 1);

        assert_eq!(reader.read_message::<Entry>().unwrap().unwrap().name, "third");
        assert!(reader.read_message::<Entry>().unwrap().is_none());
    }

    #[test]
    fn bad_message_with_callback_is_transparent() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write_message(&Entry {
                name: "first".to_string(),
            })
            .unwrap();
        writer.write_record(&[0xFF, 0xFF, 0xFF]).unwrap();
        writer
            .write_message(&Entry {
                name: "third".to_string(),
            })
            .unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = RecordReader::with_options(
            SliceSource::new(&bytes),
            recfile::ReaderOptions::new().recovery(|_| true),
        );
        let names: Vec<String> = std::iter::from_fn(|| {
            reader.read_message::<Entry>().unwrap().map(|e| e.name)
        })
        .collect();
        assert_eq!(names, vec!["first".to_string(), "third".to_string()]);
    }
}

mod positions_after_recovery {
    use super::*;

    #[test]
    fn seek_works_after_recovery() {
        let (mut bytes, begins) = five_chunk_file();
        bytes[begins[1] as usize + 45] ^= 0x01;

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap_err();
        reader.recover().unwrap();

        // Recovered readers seek like healthy ones.
        reader.seek(RecordPosition::new(begins[4], 0)).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap(), b"chunk-five-payload");
    }
}
