/// Blocking (non-async) call paths: inline transfers, the per-upload
/// driver thread, and header queries against a finished exchange.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wicket_client::scripted::{ScriptStep, ScriptedEngine};
use wicket_client::{
    Client, Config, Error, Handle, HeaderQuery, HeaderValue, TransferId, TransferResult,
};

fn client() -> (Arc<ScriptedEngine>, Client) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
    let engine = Arc::new(ScriptedEngine::new());
    let client = Client::with_engine(engine.clone(), Config::default());
    (engine, client)
}

fn open_blocking(client: &Client, verb: &str) -> (Handle, TransferId) {
    let session = client.open_session(Some("wicket-tests"), None, false).unwrap();
    let conn = client.connect(session, "test.local", 80).unwrap();
    let request = client
        .open_request(conn, Some(verb), Some("/thing"), None, None, &[], false)
        .unwrap();
    let transfer = client.transfer_id(request).unwrap();
    (request, transfer)
}

#[test]
fn blocking_get_buffers_split_body_and_reads_it_whole() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "GET");
    // 10-byte body delivered as 6 then 4: both chunks land in the
    // response buffer, and a single 10-byte read returns all of it.
    engine.set_script(
        transfer,
        vec![
            ScriptStep::Header("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n"),
            ScriptStep::Body(b"abcdef"),
            ScriptStep::Body(b"ghij"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    client.send_request(request, None, None, 0, None).unwrap();
    client.receive_response(request).unwrap();

    assert_eq!(client.query_data_available(request).unwrap(), 10);
    let body = client.read_data(request, 10).unwrap();
    assert_eq!(&body[..], b"abcdefghij");
    assert_eq!(client.query_data_available(request).unwrap(), 0);
}

#[test]
fn blocking_upload_without_total_length_is_rejected() {
    let (_engine, client) = client();
    let (request, _) = open_blocking(&client, "PUT");
    assert_eq!(
        client.send_request(request, None, None, 0, None).unwrap_err(),
        Error::InvalidParameter
    );
}

#[test]
fn blocking_upload_drains_through_driver_thread() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "PUT");
    engine.set_script(
        transfer,
        vec![
            ScriptStep::Pull { max: 16 * 1024 },
            ScriptStep::Header("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    client.send_request(request, None, None, 8, None).unwrap();
    client.write_data(request, b"pay").unwrap();
    client.write_data(request, b"load!").unwrap();
    // Blocks, polling with a bounded sleep, until the declared total has
    // been handed to the engine.
    client.receive_response(request).unwrap();
    assert_eq!(engine.uploaded(transfer), b"payload!".to_vec());
}

#[test]
fn header_queries_against_finished_exchange() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "GET");
    engine.set_script(
        transfer,
        vec![
            ScriptStep::Header("HTTP/1.1 404 Not Found\r\nX-Marker: yes\r\n\r\n"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    client.send_request(request, None, None, 0, None).unwrap();

    assert_eq!(
        client.query_headers(request, HeaderQuery::StatusCode).unwrap(),
        HeaderValue::Number(404)
    );
    assert_eq!(
        client.query_headers(request, HeaderQuery::StatusText).unwrap(),
        HeaderValue::Text("Not Found".into())
    );
    assert_eq!(
        client.query_headers(request, HeaderQuery::Version).unwrap(),
        HeaderValue::Text("1.1".into())
    );
    match client.query_headers(request, HeaderQuery::RawHeadersCrlf).unwrap() {
        HeaderValue::Text(raw) => {
            assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
            assert!(raw.contains("X-Marker: yes"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match client.query_headers(request, HeaderQuery::RawHeaders).unwrap() {
        HeaderValue::Text(raw) => {
            assert!(raw.contains("HTTP/1.1 404 Not Found\0"));
            assert!(raw.ends_with("\0\0"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn capacity_query_reports_required_size() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "GET");
    engine.set_script(
        transfer,
        vec![
            ScriptStep::Header("HTTP/1.1 200 OK\r\n\r\n"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );
    client.send_request(request, None, None, 0, None).unwrap();

    let mut tiny = [0u8; 1];
    let err = client
        .query_headers_into(request, HeaderQuery::StatusText, &mut tiny)
        .unwrap_err();
    assert_eq!(err, Error::InsufficientBuffer { required: 3 });

    let mut buf = [0u8; 8];
    let written = client
        .query_headers_into(request, HeaderQuery::StatusText, &mut buf)
        .unwrap();
    assert_eq!(&buf[..written], b"OK");
    assert_eq!(buf[written], 0);
}

#[test]
fn transport_failure_fails_the_blocking_send() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "GET");
    engine.set_script(transfer, vec![ScriptStep::Finish(TransferResult::Timeout)]);
    assert_eq!(
        client.send_request(request, None, None, 0, None).unwrap_err(),
        Error::Timeout
    );
}

#[test]
fn foreign_and_stale_handles_are_rejected() {
    let (_engine, client) = client();
    let session = client.open_session(None, None, false).unwrap();
    let conn = client.connect(session, "test.local", 80).unwrap();

    // Wrong kind for the operation.
    assert_eq!(
        client.receive_response(session).unwrap_err(),
        Error::IncorrectHandleType
    );
    // Closing twice: the second close sees a dead handle.
    client.close_handle(conn).unwrap();
    assert_eq!(client.close_handle(conn).unwrap_err(), Error::InvalidHandle);
    client.close_handle(session).unwrap();

    // A session can be closed while its connection handles live on; the
    // request path then reports the dangling back-reference.
    let session2 = client.open_session(None, None, false).unwrap();
    let conn2 = client.connect(session2, "test.local", 80).unwrap();
    client.close_handle(session2).unwrap();
    assert_eq!(
        client
            .open_request(conn2, Some("GET"), Some("/x"), None, None, &[], false)
            .unwrap_err(),
        Error::InvalidHandle
    );
}

#[test]
fn blocking_upload_poll_observes_driver_exit() {
    let (engine, client) = client();
    let (request, transfer) = open_blocking(&client, "PUT");
    // Transfer fails before the declared total is consumed: the
    // receive poll must notice the driver thread exiting and fail.
    engine.set_script(
        transfer,
        vec![ScriptStep::Finish(TransferResult::Failed("reset by peer".into()))],
    );
    client.send_request(request, None, None, 64, None).unwrap();
    let started = Instant::now();
    let err = client.receive_response(request).unwrap_err();
    assert_eq!(err, Error::OperationCancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}
