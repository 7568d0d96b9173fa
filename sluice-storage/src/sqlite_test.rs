use tempfile::NamedTempFile;

use crate::capture_test::{sample_request, sample_response};
use crate::{CaptureQuery, CaptureSort, CaptureStore, SqliteStore};

#[test]
fn sqlite_inserts_request_and_response() {
    let file = NamedTempFile::new().unwrap();
    let store = SqliteStore::open(file.path()).unwrap();

    let request_id = store.insert_request(sample_request()).unwrap().request_id;
    store.insert_response(sample_response(request_id)).unwrap();

    assert_eq!(store.count_requests().unwrap(), 1);
    assert_eq!(store.count_responses().unwrap(), 1);
}

#[test]
fn reopening_keeps_existing_rows() {
    let file = NamedTempFile::new().unwrap();
    {
        let store = SqliteStore::open(file.path()).unwrap();
        store.insert_request(sample_request()).unwrap();
    }
    let store = SqliteStore::open(file.path()).unwrap();
    assert_eq!(store.count_requests().unwrap(), 1);
}

#[test]
fn stored_request_reads_back_unchanged() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut request = sample_request();
    request.request_body = b"payload".to_vec();
    request.request_body_size = 7;
    request.query = Some("q=1".to_string());
    let id = store.insert_request(request.clone()).unwrap().request_id;

    let entries = store
        .query_requests(&CaptureQuery::default(), CaptureSort::StartedAtAsc)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    assert_eq!(entries[0].request, request);
    assert_eq!(entries[0].status_code, None);
}
