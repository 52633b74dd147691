/// Notification-protocol tests, driven through the scripted engine so the
/// interleavings are deterministic: the engine only makes progress where
/// the script says so.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wicket_client::scripted::{ScriptStep, ScriptedEngine};
use wicket_client::{
    Client, Config, Error, Handle, NOTIFY_ALL, Payload, Status, TransferId, TransferResult,
};

const OK_HEAD_5: &str = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
const OK_HEAD_10: &str = "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n";
const OK_HEAD_EMPTY: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

struct Harness {
    engine: Arc<ScriptedEngine>,
    client: Client,
    events: Arc<Mutex<Vec<(Status, Payload)>>>,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
    let engine = Arc::new(ScriptedEngine::new());
    let client = Client::with_engine(engine.clone(), Config::default());
    Harness {
        engine,
        client,
        events: Arc::new(Mutex::new(Vec::new())),
    }
}

impl Harness {
    /// Async session + connection + request with a recording callback.
    fn open_request(&self, verb: &str) -> (Handle, TransferId) {
        let session = self
            .client
            .open_session(Some("wicket-tests"), None, true)
            .unwrap();
        let events = self.events.clone();
        self.client
            .set_status_callback(
                session,
                Some(Arc::new(move |_handle, _context, status, payload: &Payload| {
                    events.lock().unwrap().push((status, payload.clone()));
                })),
                NOTIFY_ALL,
            )
            .unwrap();
        let conn = self.client.connect(session, "test.local", 80).unwrap();
        let request = self
            .client
            .open_request(conn, Some(verb), Some("/resource"), None, None, &[], false)
            .unwrap();
        let transfer = self.client.transfer_id(request).unwrap();
        (request, transfer)
    }

    fn events(&self) -> Vec<(Status, Payload)> {
        self.events.lock().unwrap().clone()
    }

    fn statuses(&self) -> Vec<Status> {
        self.events().into_iter().map(|(s, _)| s).collect()
    }

    fn count(&self, status: Status) -> usize {
        self.statuses().iter().filter(|&&s| s == status).count()
    }

    #[track_caller]
    fn wait_until(&self, what: &str, pred: impl Fn(&[(Status, Payload)]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if pred(&self.events()) {
                return;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for {what}; events: {:?}", self.statuses());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for(&self, status: Status) {
        self.wait_until(&format!("{status:?}"), |events| {
            events.iter().any(|(s, _)| *s == status)
        });
    }
}

fn index_of(statuses: &[Status], wanted: Status) -> usize {
    statuses
        .iter()
        .position(|&s| s == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not found in {statuses:?}"))
}

#[test]
fn success_progression_is_ordered_and_exactly_once() {
    let h = harness();
    let (request, transfer) = h.open_request("GET");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Header(OK_HEAD_5),
            ScriptStep::Body(b"hello"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client
        .send_request(request, None, None, 0, Some(7))
        .unwrap();
    h.client.receive_response(request).unwrap();

    h.wait_for(Status::HeadersAvailable);
    let statuses = h.statuses();

    for status in [
        Status::SendingRequest,
        Status::RequestSent,
        Status::SendRequestComplete,
        Status::ReceivingResponse,
        Status::ResponseReceived,
        Status::HeadersAvailable,
    ] {
        assert_eq!(
            statuses.iter().filter(|&&s| s == status).count(),
            1,
            "{status:?} should fire exactly once in {statuses:?}"
        );
    }
    let receiving = index_of(&statuses, Status::ReceivingResponse);
    let received = index_of(&statuses, Status::ResponseReceived);
    let available = index_of(&statuses, Status::HeadersAvailable);
    assert!(receiving < received && received < available);
    assert_eq!(statuses[0], Status::SendingRequest);
    assert_eq!(h.count(Status::Redirect), 0);

    // The response-received payload is the raw header length.
    let (_, payload) = h
        .events()
        .into_iter()
        .find(|(s, _)| *s == Status::ResponseReceived)
        .unwrap();
    assert_eq!(payload, Payload::Size(OK_HEAD_5.len()));
}

#[test]
fn redirects_emit_one_notification_each() {
    let h = harness();
    let (request, transfer) = h.open_request("GET");
    // The real engine delivers each head of the chain while following
    // 301/302 on its own; the script replays that arrival pattern.
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Header("HTTP/1.1 301 Moved Permanently\r\nLocation: /a\r\n\r\n"),
            ScriptStep::Header("HTTP/1.1 302 Found\r\nLocation: /b\r\n\r\n"),
            ScriptStep::Header(OK_HEAD_EMPTY),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client.send_request(request, None, None, 0, None).unwrap();
    h.client.receive_response(request).unwrap();

    h.wait_for(Status::HeadersAvailable);
    let statuses = h.statuses();

    assert_eq!(h.count(Status::Redirect), 2, "events: {statuses:?}");
    assert_eq!(h.count(Status::ReceivingResponse), 1);
    assert_eq!(h.count(Status::ResponseReceived), 1);
    assert_eq!(h.count(Status::HeadersAvailable), 1);

    let receiving = index_of(&statuses, Status::ReceivingResponse);
    let received = index_of(&statuses, Status::ResponseReceived);
    let first_redirect = index_of(&statuses, Status::Redirect);
    let last_redirect = statuses
        .iter()
        .rposition(|&s| s == Status::Redirect)
        .unwrap();
    let available = index_of(&statuses, Status::HeadersAvailable);
    assert!(receiving < received);
    assert!(received < first_redirect, "events: {statuses:?}");
    assert!(last_redirect < available, "events: {statuses:?}");
}

#[test]
fn queued_reads_complete_in_posting_order_with_exact_bytes() {
    let h = harness();
    let (request, transfer) = h.open_request("GET");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Header(OK_HEAD_10),
            ScriptStep::Hold,
            ScriptStep::Body(b"abcdef"),
            ScriptStep::Body(b"ghij"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client.send_request(request, None, None, 0, None).unwrap();
    h.client.receive_response(request).unwrap();
    h.wait_for(Status::HeadersAvailable);

    // Engine is held: these reads must queue, not fail.
    for _ in 0..3 {
        let direct = h.client.read_data(request, 4).unwrap();
        assert!(direct.is_empty(), "no data should be available yet");
    }
    h.engine.release(transfer);

    h.wait_until("three read completions", |events| {
        events.iter().filter(|(s, _)| *s == Status::ReadComplete).count() == 3
    });
    let reads: Vec<Payload> = h
        .events()
        .into_iter()
        .filter(|(s, _)| *s == Status::ReadComplete)
        .map(|(_, p)| p)
        .collect();
    // Arrival order, no reorder, loss, or duplication; each completion
    // is at most the requested length. The second slot is retired by a
    // partial fill.
    assert_eq!(
        reads,
        vec![
            Payload::Data(bytes::Bytes::from_static(b"abcd")),
            Payload::Data(bytes::Bytes::from_static(b"ef")),
            Payload::Data(bytes::Bytes::from_static(b"ghij")),
        ]
    );
}

#[test]
fn data_available_query_is_idempotent_until_new_bytes() {
    let h = harness();
    let (request, transfer) = h.open_request("GET");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Header("HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\n"),
            ScriptStep::Hold,
            ScriptStep::Body(b"abc"),
            ScriptStep::Hold,
            ScriptStep::Body(b"def"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client.send_request(request, None, None, 0, None).unwrap();
    h.client.receive_response(request).unwrap();
    h.wait_for(Status::HeadersAvailable);

    // No bytes yet: the query arms a deferred notification.
    assert_eq!(h.client.query_data_available(request).unwrap(), 0);
    h.engine.release(transfer);
    h.wait_until("first data-available", |events| {
        events.iter().any(|(s, p)| *s == Status::DataAvailable && *p == Payload::Size(3))
    });

    // Re-query before new bytes: same count, no re-emission.
    assert_eq!(h.client.query_data_available(request).unwrap(), 3);
    assert_eq!(h.client.query_data_available(request).unwrap(), 3);
    assert_eq!(h.count(Status::DataAvailable), 1);

    // New bytes re-arm the emission.
    h.engine.release(transfer);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if h.client.query_data_available(request).unwrap() == 6 {
            break;
        }
        assert!(Instant::now() < deadline, "second chunk never arrived");
        std::thread::sleep(Duration::from_millis(5));
    }
    h.wait_until("second data-available", |events| {
        events.iter().any(|(s, p)| *s == Status::DataAvailable && *p == Payload::Size(6))
    });
    assert_eq!(h.count(Status::DataAvailable), 2);
}

#[test]
fn close_with_queued_notifications_ends_with_one_handle_closing() {
    let h = harness();
    let (request, transfer) = h.open_request("GET");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Header(OK_HEAD_5),
            ScriptStep::Body(b"hello"),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client.send_request(request, None, None, 0, None).unwrap();
    h.client.receive_response(request).unwrap();
    // Close while the progression records may still be in the queue.
    h.client.close_handle(request).unwrap();

    h.wait_for(Status::HandleClosing);
    // Give any stray late records a moment to surface, then check the
    // closing notification is terminal and unique.
    std::thread::sleep(Duration::from_millis(50));
    let statuses = h.statuses();
    assert_eq!(h.count(Status::HandleClosing), 1, "events: {statuses:?}");
    assert_eq!(*statuses.last().unwrap(), Status::HandleClosing);

    // The handle is gone: further calls are rejected.
    assert_eq!(
        h.client.read_data(request, 1).unwrap_err(),
        Error::InvalidHandle
    );
}

#[test]
fn early_writes_are_buffered_and_drained_in_submission_order() {
    let h = harness();
    let (request, transfer) = h.open_request("PUT");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Hold,
            ScriptStep::Pull { max: 16 * 1024 },
            ScriptStep::Header(OK_HEAD_EMPTY),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    h.client
        .send_request(request, None, None, 12, None)
        .unwrap();
    // The engine is held, so it is definitely not requesting data yet.
    assert_eq!(h.client.write_data(request, b"aaaa").unwrap(), 4);
    assert_eq!(h.client.write_data(request, b"bbbb").unwrap(), 4);
    assert_eq!(h.client.write_data(request, b"cccc").unwrap(), 4);
    h.engine.release(transfer);

    h.wait_until("three write completions", |events| {
        events.iter().filter(|(s, _)| *s == Status::WriteComplete).count() == 3
    });
    assert_eq!(h.engine.uploaded(transfer), b"aaaabbbbcccc".to_vec());
    let writes: Vec<Payload> = h
        .events()
        .into_iter()
        .filter(|(s, _)| *s == Status::WriteComplete)
        .map(|(_, p)| p)
        .collect();
    assert_eq!(
        writes,
        vec![Payload::Size(4), Payload::Size(4), Payload::Size(4)]
    );
    h.client.receive_response(request).unwrap();
    h.wait_for(Status::HeadersAvailable);
}

#[test]
fn async_upload_suspends_until_data_is_written() {
    let h = harness();
    let (request, transfer) = h.open_request("PUT");
    h.engine.set_script(
        transfer,
        vec![
            ScriptStep::Pull { max: 16 * 1024 },
            ScriptStep::Header(OK_HEAD_EMPTY),
            ScriptStep::Finish(TransferResult::Ok),
        ],
    );

    // Declared total of 100 with nothing written: the drain path must
    // request suspension, not emit zero or garbage bytes.
    h.client
        .send_request(request, None, None, 100, None)
        .unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert!(h.engine.uploaded(transfer).is_empty());
    assert!(!h.engine.upload_finished(transfer));
    assert_eq!(h.count(Status::WriteComplete), 0);

    let payload = vec![0x5a_u8; 100];
    h.client.write_data(request, &payload).unwrap();
    h.wait_until("upload drained", |_| h.engine.uploaded(transfer) == payload);
    h.wait_for(Status::WriteComplete);
    h.client.receive_response(request).unwrap();
    h.wait_for(Status::HeadersAvailable);
}

#[test]
fn releasing_last_reference_emits_exactly_one_handle_closing() {
    let h = harness();
    let (request, _transfer) = h.open_request("GET");
    // Never sent: zero notifications are queued when the last reference
    // goes away.
    h.client.close_handle(request).unwrap();

    h.wait_for(Status::HandleClosing);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.statuses(), vec![Status::HandleClosing]);
    assert_eq!(
        h.client.close_handle(request).unwrap_err(),
        Error::InvalidHandle
    );
}

#[test]
fn transport_failures_surface_as_reported_errors() {
    let h = harness();

    let (timeout_request, timeout_transfer) = h.open_request("GET");
    h.engine
        .set_script(timeout_transfer, vec![ScriptStep::Finish(TransferResult::Timeout)]);
    h.client
        .send_request(timeout_request, None, None, 0, None)
        .unwrap();
    h.wait_until("timeout error", |events| {
        events
            .iter()
            .any(|(s, p)| *s == Status::RequestError && *p == Payload::Error(Error::Timeout))
    });

    // An unexpected engine outcome is reported as an error notification;
    // the process must keep running (the dispatcher answers below).
    let (odd_request, odd_transfer) = h.open_request("GET");
    h.engine.set_script(
        odd_transfer,
        vec![ScriptStep::Finish(TransferResult::Failed("engine hiccup".into()))],
    );
    h.client
        .send_request(odd_request, None, None, 0, None)
        .unwrap();
    h.wait_until("reported generic error", |events| {
        events.iter().any(|(s, p)| {
            *s == Status::RequestError && *p == Payload::Error(Error::OperationCancelled)
        })
    });
}
