//! # Read/Write Round-Trip Tests
//!
//! End-to-end coverage of the healthy paths: empty and signature-only
//! files, sequential reading, chunks spanning block boundaries, and the
//! seek guarantees (idempotence, random-access equivalence, byte-position
//! interpretation).

use recfile::{
    CompressionType, RecordPosition, RecordReader, RecordWriter, SliceSource, WriterOptions,
};

/// Writes each group of records as its own chunk.
fn write_chunks(groups: &[&[&[u8]]], options: WriterOptions) -> Vec<u8> {
    let mut writer = RecordWriter::with_options(Vec::new(), options);
    for group in groups {
        for record in *group {
            writer.write_record(record).unwrap();
        }
        writer.flush().unwrap();
    }
    writer.finish().unwrap()
}

fn read_all(bytes: &[u8]) -> Vec<(RecordPosition, Vec<u8>)> {
    let mut reader = RecordReader::new(SliceSource::new(bytes));
    let mut out = Vec::new();
    while let Some((key, record)) = reader.read_record_at().unwrap() {
        out.push((key, record.to_vec()));
    }
    assert!(reader.is_healthy());
    out
}

mod empty_and_signature_files {
    use super::*;

    #[test]
    fn empty_source_has_no_records() {
        let mut reader = RecordReader::new(SliceSource::new(b""));
        assert!(!reader.check_file_format().unwrap());
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.is_healthy());
    }

    #[test]
    fn signature_only_file_has_no_records() {
        let bytes = RecordWriter::new(Vec::new()).finish().unwrap();

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        assert!(reader.check_file_format().unwrap());
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.is_healthy());
    }

    #[test]
    fn signature_only_file_size_is_64() {
        let bytes = RecordWriter::new(Vec::new()).finish().unwrap();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        assert_eq!(reader.size().unwrap(), 64);
    }

    #[test]
    fn signature_only_file_metadata_is_default() {
        let bytes = RecordWriter::new(Vec::new()).finish().unwrap();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        let metadata = reader.read_metadata().unwrap();
        assert_eq!(metadata, recfile::RecordsMetadata::default());
        assert!(reader.read_record().unwrap().is_none());
    }
}

mod sequential_reading {
    use super::*;

    #[test]
    fn three_records_in_one_chunk() {
        let bytes = write_chunks(&[&[b"a", b"", b"hello"]], WriterOptions::new());

        let records = read_all(&bytes);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].1, b"a");
        assert_eq!(records[1].1, b"");
        assert_eq!(records[2].1, b"hello");

        // Same chunk, consecutive indices.
        let chunk_begin = records[0].0.chunk_begin();
        for (i, (key, _)) in records.iter().enumerate() {
            assert_eq!(key.chunk_begin(), chunk_begin);
            assert_eq!(key.record_index(), i as u64);
        }
    }

    #[test]
    fn fourth_read_is_clean_eof() {
        let bytes = write_chunks(&[&[b"a", b"", b"hello"]], WriterOptions::new());
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        for _ in 0..3 {
            assert!(reader.read_record().unwrap().is_some());
        }
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.is_healthy());
        // EOF is stable.
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn compressed_chunks_roundtrip() {
        let payload = vec![b'x'; 10_000];
        for codec in [
            CompressionType::Brotli,
            CompressionType::Zstd,
            CompressionType::Snappy,
        ] {
            let bytes = write_chunks(
                &[&[&payload[..], b"tail"]],
                WriterOptions::new().compression(codec),
            );
            let records = read_all(&bytes);
            assert_eq!(records.len(), 2, "codec {:?}", codec);
            assert_eq!(records[0].1, payload);
            assert_eq!(records[1].1, b"tail");
        }
    }

    #[test]
    fn keys_are_monotonic() {
        let groups: Vec<Vec<u8>> = (0..50).map(|i| format!("record-{i}").into_bytes()).collect();
        let group_refs: Vec<&[u8]> = groups.iter().map(|g| g.as_slice()).collect();
        let bytes = write_chunks(
            &[&group_refs[..20], &group_refs[20..35], &group_refs[35..]],
            WriterOptions::new(),
        );

        let records = read_all(&bytes);
        assert_eq!(records.len(), 50);
        for pair in records.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }
}

mod block_boundaries {
    use super::*;

    /// A chunk bigger than a block: its payload spans offset 65536.
    fn two_chunks_across_a_block() -> Vec<u8> {
        let big: Vec<Vec<u8>> = (0..9).map(|i| vec![i as u8; 8_192]).collect();
        let big_refs: Vec<&[u8]> = big.iter().map(|r| r.as_slice()).collect();
        write_chunks(
            &[&big_refs[..], &[b"second-chunk-first", b"second-chunk-rest"]],
            WriterOptions::new(),
        )
    }

    #[test]
    fn chunk_spanning_a_block_reads_back() {
        let bytes = two_chunks_across_a_block();
        assert!(bytes.len() > recfile::chunks::BLOCK_SIZE as usize);

        let records = read_all(&bytes);
        assert_eq!(records.len(), 11);
        assert_eq!(records[0].1, vec![0u8; 8_192]);
        assert_eq!(records[8].1, vec![8u8; 8_192]);
        assert_eq!(records[9].1, b"second-chunk-first");
    }

    #[test]
    fn seek_to_second_chunk_first_record() {
        let bytes = two_chunks_across_a_block();
        let records = read_all(&bytes);
        let target = records[9].0;
        assert_ne!(target.chunk_begin(), records[0].0.chunk_begin());
        assert_eq!(target.record_index(), 0);

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.seek(target).unwrap();
        let (key, record) = reader.read_record_at().unwrap().unwrap();
        assert_eq!(key, target);
        assert_eq!(record, b"second-chunk-first");
    }

    #[test]
    fn chunk_layout_does_not_change_records() {
        // The same records split into different chunk shapes, with and
        // without block padding, read back identically.
        let records: Vec<Vec<u8>> = (0..40).map(|i| vec![i as u8; 3_000]).collect();
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();

        let one_chunk = write_chunks(&[&refs[..]], WriterOptions::new());
        let many_chunks = write_chunks(
            &[&refs[..7], &refs[7..13], &refs[13..30], &refs[30..]],
            WriterOptions::new(),
        );
        let mut writer = RecordWriter::new(Vec::new());
        for (i, record) in refs.iter().enumerate() {
            writer.write_record(record).unwrap();
            if i % 11 == 10 {
                writer.pad_to_block_boundary().unwrap();
            }
        }
        let padded = writer.finish().unwrap();

        let from = |bytes: &[u8]| {
            read_all(bytes)
                .into_iter()
                .map(|(_, r)| r)
                .collect::<Vec<_>>()
        };
        assert_eq!(from(&one_chunk), records);
        assert_eq!(from(&many_chunks), records);
        assert_eq!(from(&padded), records);
    }
}

mod seeking {
    use super::*;

    fn sample_file() -> Vec<u8> {
        let records: Vec<Vec<u8>> = (0..30).map(|i| format!("payload-{i:03}").into_bytes()).collect();
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        write_chunks(
            &[&refs[..10], &refs[10..12], &refs[12..]],
            WriterOptions::new().compression(CompressionType::Zstd),
        )
    }

    #[test]
    fn random_access_equals_sequential() {
        let bytes = sample_file();
        let sequential = read_all(&bytes);

        for (key, record) in &sequential {
            let mut reader = RecordReader::new(SliceSource::new(&bytes));
            reader.seek(*key).unwrap();
            let (got_key, got_record) = reader.read_record_at().unwrap().unwrap();
            assert_eq!(got_key, *key);
            assert_eq!(got_record, &record[..]);
        }
    }

    #[test]
    fn seek_to_current_pos_is_a_noop() {
        let bytes = sample_file();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap().unwrap();

        let pos = reader.pos();
        reader.seek(pos).unwrap();
        assert_eq!(reader.pos(), pos);
        let (key, record) = reader.read_record_at().unwrap().unwrap();
        assert_eq!(key, pos);

        // The same read without the seek.
        let mut plain = RecordReader::new(SliceSource::new(&bytes));
        plain.read_record().unwrap().unwrap();
        plain.read_record().unwrap().unwrap();
        let (plain_key, plain_record) = plain.read_record_at().unwrap().unwrap();
        assert_eq!(plain_key, key);
        assert_eq!(plain_record, record);
    }

    #[test]
    fn seek_back_and_forth() {
        let bytes = sample_file();
        let sequential = read_all(&bytes);
        let mut reader = RecordReader::new(SliceSource::new(&bytes));

        for &index in &[25usize, 3, 17, 0, 29, 11] {
            let (key, expected) = &sequential[index];
            reader.seek(*key).unwrap();
            let (got_key, got) = reader.read_record_at().unwrap().unwrap();
            assert_eq!(got_key, *key);
            assert_eq!(got, &expected[..]);
        }
    }

    #[test]
    fn byte_position_seek_resolves_records() {
        let bytes = sample_file();
        let sequential = read_all(&bytes);

        for (key, record) in &sequential {
            let mut reader = RecordReader::new(SliceSource::new(&bytes));
            reader.seek_to_byte(key.numeric()).unwrap();
            let (got_key, got_record) = reader.read_record_at().unwrap().unwrap();
            assert_eq!(got_key, *key, "byte {} misresolved", key.numeric());
            assert_eq!(got_record, &record[..]);
        }
    }

    #[test]
    fn byte_seek_to_zero_reads_from_the_start() {
        let bytes = sample_file();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.read_record().unwrap().unwrap();
        reader.read_record().unwrap().unwrap();

        reader.seek_to_byte(0).unwrap();
        let (key, _) = reader.read_record_at().unwrap().unwrap();
        assert_eq!(key.record_index(), 0);
    }

    #[test]
    fn seek_past_num_records_exhausts_the_chunk() {
        let bytes = sample_file();
        let sequential = read_all(&bytes);
        let first_chunk = sequential[0].0.chunk_begin();

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader
            .seek(RecordPosition::new(first_chunk, 999))
            .unwrap();
        // The next read advances past the chunk and continues with the
        // following one.
        let (key, _) = reader.read_record_at().unwrap().unwrap();
        assert_eq!(key, sequential[10].0);
    }

    #[test]
    fn seek_to_end_of_file_position() {
        let bytes = sample_file();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        while reader.read_record().unwrap().is_some() {}

        // pos() after the final record is the end-of-file chunk begin;
        // seeking there must not try to read a chunk.
        let end = reader.pos();
        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        reader.seek(end).unwrap();
        assert!(reader.read_record().unwrap().is_none());
        assert!(reader.is_healthy());
    }
}

mod typed_records {
    use super::*;
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    struct Entry {
        #[prost(string, tag = "1")]
        name: String,
        #[prost(uint64, tag = "2")]
        value: u64,
    }

    #[test]
    fn messages_roundtrip() {
        let entries: Vec<Entry> = (0..10)
            .map(|i| Entry {
                name: format!("entry-{i}"),
                value: i * 1000,
            })
            .collect();

        let mut writer = RecordWriter::new(Vec::new());
        for entry in &entries {
            writer.write_message(entry).unwrap();
        }
        let bytes = writer.finish().unwrap();

        let mut reader = RecordReader::new(SliceSource::new(&bytes));
        let mut got = Vec::new();
        while let Some(entry) = reader.read_message::<Entry>().unwrap() {
            got.push(entry);
        }
        assert_eq!(got, entries);
    }
}
