// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! End-to-end transfers over the loopback interface.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use xfrd::class::Class;
use xfrd::db::{Catalog, ZoneEntry, ZoneKind};
use xfrd::io::{Limits, TokioIoProvider, TokioShutdownController, TransferService};
use xfrd::message::tsig::{Algorithm, Keyring, TsigKey};
use xfrd::message::{Opcode, Rcode};
use xfrd::name::Name;
use xfrd::rr::{Record, Soa, Ttl, Type};
use xfrd::xfr::framer::{MessageReader, StreamHeader};
use xfrd::xfr::{
    parse_request, refresh_zone, Candidate, Change, Delta, MessageFramer, Method, PullConfig,
    PullStatus, QueryKind,
};

////////////////////////////////////////////////////////////////////////
// ZONE DATA                                                          //
////////////////////////////////////////////////////////////////////////

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

fn soa(serial: u32) -> Record {
    let soa = Soa {
        mname: name("ns1.example."),
        rname: name("hostmaster.example."),
        serial,
        refresh: 3600,
        retry: 900,
        expire: 604800,
        minimum: 300,
    };
    Record::new_soa(name("example."), Class::IN, Ttl::from(3600), &soa)
}

fn record(owner: &str, rr_type: Type, rdata: Vec<u8>) -> Record {
    Record {
        owner: name(owner),
        rr_type,
        class: Class::IN,
        ttl: Ttl::from(3600),
        rdata: rdata.into(),
    }
}

fn version_txt(serial: u32) -> Record {
    let text = format!("v{serial}");
    let mut rdata = vec![text.len() as u8];
    rdata.extend_from_slice(text.as_bytes());
    record("example.", Type::TXT, rdata)
}

fn zone_records(serial: u32) -> Vec<Record> {
    vec![
        soa(serial),
        record("example.", Type::NS, name("ns1.example.").wire_repr().to_vec()),
        record("ns1.example.", Type::A, vec![192, 0, 2, 1]),
        record("www.example.", Type::A, vec![192, 0, 2, 80]),
        version_txt(serial),
    ]
}

/// The version that takes the zone from `to - 1` to `to`.
fn delta(to: u32) -> Delta {
    Delta {
        from_serial: to - 1,
        to_serial: to,
        changes: vec![
            Change::delete(soa(to - 1)),
            Change::delete(version_txt(to - 1)),
            Change::add(soa(to)),
            Change::add(version_txt(to)),
        ],
    }
}

fn has_record(entry: &ZoneEntry, wanted: &Record) -> bool {
    entry
        .snapshot()
        .unwrap()
        .records()
        .any(|r| r.same_data(wanted))
}

////////////////////////////////////////////////////////////////////////
// HARNESS                                                            //
////////////////////////////////////////////////////////////////////////

struct Server {
    addr: SocketAddr,
    entry: Arc<ZoneEntry>,
    controller: TokioShutdownController,
}

/// Starts a server for `example.` at `serial`, with the versions from
/// `history_from` (if any) in its delta log.
async fn start_server(serial: u32, history_from: Option<u32>, keyring: Keyring) -> Server {
    let catalog = Arc::new(Catalog::new());
    let (entry, _) = catalog.insert(name("example."), Class::IN, ZoneKind::Primary, 64);
    match history_from {
        Some(start) => {
            entry.reset_zone_image(zone_records(start)).unwrap();
            for to in start + 1..=serial {
                entry.append_delta(delta(to)).unwrap();
            }
        }
        None => {
            entry.reset_zone_image(zone_records(serial)).unwrap();
        }
    }
    serve(catalog, entry, keyring).await
}

/// Serves `catalog` on an ephemeral loopback port.
async fn serve(catalog: Arc<Catalog>, entry: Arc<ZoneEntry>, keyring: Keyring) -> Server {
    let service = Arc::new(TransferService::new(catalog, keyring, Limits::default()));
    let provider = TokioIoProvider::bind(["127.0.0.1:0".parse().unwrap()])
        .await
        .unwrap();
    let addr = provider.local_addrs().unwrap()[0];
    let controller = provider.start(&service);
    Server {
        addr,
        entry,
        controller,
    }
}

fn client_at(serial: Option<u32>) -> Arc<ZoneEntry> {
    let catalog = Catalog::new();
    let (entry, _) = catalog.insert(name("example."), Class::IN, ZoneKind::Secondary, 16);
    if let Some(serial) = serial {
        entry.reset_zone_image(zone_records(serial)).unwrap();
    }
    entry
}

fn candidate(addr: SocketAddr, method: Method) -> Candidate {
    Candidate {
        addr,
        method,
        key: None,
    }
}

fn config() -> PullConfig {
    PullConfig {
        connect_timeout: Duration::from_secs(2),
        first_read_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_secs(10),
    }
}

fn test_key(secret: &[u8]) -> TsigKey {
    TsigKey::new(name("transfer.example."), Algorithm::HmacSha256, secret.to_vec())
}

////////////////////////////////////////////////////////////////////////
// TRANSFERS AGAINST THE SERVER                                       //
////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn equal_serials_are_up_to_date() {
    let server = start_server(10, None, Keyring::new()).await;
    let client = client_at(Some(10));
    let generation = client.generation();

    let status = refresh_zone(&client, vec![candidate(server.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::UpToDate);
    assert_eq!(client.generation(), generation);
    assert!(!client.flags().transfer_needed);
    assert!(!client.flags().notify_pending);

    server.controller.shut_down().await;
}

#[tokio::test]
async fn ixfr_brings_client_up_to_date() {
    let server = start_server(15, Some(10), Keyring::new()).await;
    assert_eq!(server.entry.delta_log_len(), 5);
    let client = client_at(Some(10));

    let status = refresh_zone(&client, vec![candidate(server.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Incremental);
    assert_eq!(client.current_serial(), Some(15));
    assert_eq!(client.delta_log_len(), 5);
    assert!(client.flags().notify_pending);
    assert!(has_record(&client, &version_txt(15)));
    assert!(!has_record(&client, &version_txt(10)));
    assert_eq!(
        client.snapshot().unwrap().len(),
        server.entry.snapshot().unwrap().len()
    );

    server.controller.shut_down().await;
}

#[tokio::test]
async fn missing_history_falls_back_to_full_transfer() {
    let server = start_server(15, None, Keyring::new()).await;
    let client = client_at(Some(10));

    let status = refresh_zone(&client, vec![candidate(server.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Full);
    assert_eq!(client.current_serial(), Some(15));
    assert_eq!(client.delta_log_len(), 0);
    assert!(has_record(&client, &version_txt(15)));
    assert!(client.flags().notify_pending);

    server.controller.shut_down().await;
}

#[tokio::test]
async fn empty_client_gets_axfr() {
    let server = start_server(15, Some(10), Keyring::new()).await;
    let client = client_at(None);

    let status = refresh_zone(&client, vec![candidate(server.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Full);
    assert_eq!(client.current_serial(), Some(15));

    server.controller.shut_down().await;
}

#[tokio::test]
async fn stale_server_is_skipped() {
    let stale = start_server(15, None, Keyring::new()).await;
    let client = client_at(Some(20));
    let generation = client.generation();

    let status = refresh_zone(&client, vec![candidate(stale.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert_eq!(client.current_serial(), Some(20));
    assert_eq!(client.generation(), generation);

    let fresh = start_server(21, None, Keyring::new()).await;
    let candidates = vec![
        candidate(stale.addr, Method::Ixfr),
        candidate(fresh.addr, Method::Axfr),
    ];
    let status = refresh_zone(&client, candidates, &config()).await.unwrap();
    assert_eq!(status, PullStatus::Full);
    assert_eq!(client.current_serial(), Some(21));

    stale.controller.shut_down().await;
    fresh.controller.shut_down().await;
}

#[tokio::test]
async fn unknown_zone_fails() {
    let server = start_server(10, None, Keyring::new()).await;
    let catalog = Catalog::new();
    let (client, _) = catalog.insert(name("example.net."), Class::IN, ZoneKind::Secondary, 16);

    let status = refresh_zone(&client, vec![candidate(server.addr, Method::Axfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert!(client.snapshot().is_none());

    server.controller.shut_down().await;
}

#[tokio::test]
async fn signed_transfer_succeeds() {
    let mut keyring = Keyring::new();
    keyring.insert(test_key(b"correct horse battery staple"));
    let server = start_server(15, Some(10), keyring).await;
    let client = client_at(Some(10));

    let mut signed = candidate(server.addr, Method::Ixfr);
    signed.key = Some(Arc::new(test_key(b"correct horse battery staple")));
    let status = refresh_zone(&client, vec![signed], &config()).await.unwrap();
    assert_eq!(status, PullStatus::Incremental);
    assert_eq!(client.current_serial(), Some(15));

    server.controller.shut_down().await;
}

#[tokio::test]
async fn wrongly_keyed_transfer_fails() {
    let mut keyring = Keyring::new();
    keyring.insert(test_key(b"correct horse battery staple"));
    let server = start_server(15, Some(10), keyring).await;
    let client = client_at(Some(10));

    let mut signed = candidate(server.addr, Method::Ixfr);
    signed.key = Some(Arc::new(test_key(b"incorrect horse")));
    let status = refresh_zone(&client, vec![signed], &config()).await.unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert_eq!(client.current_serial(), Some(10));

    server.controller.shut_down().await;
}

#[tokio::test]
async fn unreachable_server_fails() {
    // Bind and immediately drop a listener to find a closed port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_at(Some(10));
    let status = refresh_zone(&client, vec![candidate(addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert_eq!(client.current_serial(), Some(10));
}

#[tokio::test]
async fn pulled_zone_serves_identically() {
    let mut records = zone_records(15);
    records.extend([
        record("sub.example.", Type::NS, name("ns.sub.example.").wire_repr().to_vec()),
        record("ns.sub.example.", Type::A, vec![192, 0, 2, 53]),
        record("mail.example.", Type::MX, {
            let mut rdata = vec![0, 10];
            rdata.extend_from_slice(name("www.example.").wire_repr());
            rdata
        }),
    ]);
    let catalog = Arc::new(Catalog::new());
    let (entry, _) = catalog.insert(name("example."), Class::IN, ZoneKind::Primary, 64);
    entry.reset_zone_image(records).unwrap();
    let origin = serve(catalog, entry, Keyring::new()).await;

    // Pull from the origin, then serve what was received.
    let middle = client_at(None);
    let status = refresh_zone(&middle, vec![candidate(origin.addr, Method::Axfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Full);
    let catalog = Arc::new(Catalog::new());
    let (relay_entry, _) = catalog.insert(name("example."), Class::IN, ZoneKind::Primary, 64);
    let received: Vec<Record> = middle.snapshot().unwrap().records().cloned().collect();
    relay_entry.reset_zone_image(received).unwrap();
    let relay = serve(catalog, relay_entry, Keyring::new()).await;

    let last = client_at(None);
    let status = refresh_zone(&last, vec![candidate(relay.addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Full);

    let expected = origin.entry.snapshot().unwrap();
    let actual = last.snapshot().unwrap();
    assert_eq!(actual.len(), expected.len());
    for wanted in expected.records() {
        assert!(actual.records().any(|r| r.same_data(wanted)), "missing {wanted:?}");
    }
    assert_eq!(last.soa_of(), origin.entry.soa_of());

    origin.controller.shut_down().await;
    relay.controller.shut_down().await;
}

////////////////////////////////////////////////////////////////////////
// SCRIPTED SERVERS                                                   //
////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct Counts {
    ixfr: AtomicUsize,
    axfr: AtomicUsize,
}

/// The answers a scripted server sends for a query. `None` leaves the
/// query unanswered.
type Script = fn(&QueryKind) -> Option<Vec<Record>>;

/// Starts a server that answers every query by `script`.
async fn start_scripted(script: Script) -> (SocketAddr, Arc<Counts>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counts = Arc::new(Counts::default());
    let task_counts = counts.clone();
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_scripted(stream, script, task_counts.clone()));
        }
    });
    (addr, counts, task)
}

async fn serve_scripted(stream: TcpStream, script: Script, counts: Arc<Counts>) {
    let keyring = Keyring::new();
    let mut reader = MessageReader::new(stream);
    loop {
        let request = match reader.next_message(Duration::from_secs(5)).await {
            Ok(message) => match parse_request(message, &keyring) {
                Ok(request) => request,
                Err(_) => return,
            },
            Err(_) => return,
        };
        match request.kind {
            QueryKind::Soa => (),
            QueryKind::Ixfr { .. } => {
                counts.ixfr.fetch_add(1, Ordering::SeqCst);
            }
            QueryKind::Axfr => {
                counts.axfr.fetch_add(1, Ordering::SeqCst);
            }
        }
        let answers = match script(&request.kind) {
            Some(answers) => answers,
            None => {
                // Hold the connection open without answering.
                sleep(Duration::from_secs(30)).await;
                return;
            }
        };
        let header = StreamHeader {
            id: request.id,
            opcode: Opcode::Query,
            rcode: Rcode::NoError,
            aa: true,
            question: Some(request.question.clone()),
        };
        let mut framer = MessageFramer::new(header, 65535, None);
        for answer in &answers {
            framer.push_answer(answer).unwrap();
        }
        framer.finish().unwrap();
        if reader
            .get_mut()
            .write_all(&framer.take_output())
            .await
            .is_err()
        {
            return;
        }
    }
}

/// IXFR responses start at the wrong serial, and AXFR responses close
/// with the wrong SOA.
fn inconsistent(kind: &QueryKind) -> Option<Vec<Record>> {
    Some(match kind {
        QueryKind::Soa => vec![soa(15)],
        QueryKind::Ixfr { .. } => vec![soa(15), soa(12), soa(13), soa(15)],
        QueryKind::Axfr => vec![
            soa(15),
            record("www.example.", Type::A, vec![192, 0, 2, 80]),
            soa(14),
        ],
    })
}

#[tokio::test]
async fn inconsistent_responses_restart_at_most_twice() {
    let (addr, counts, server) = start_scripted(inconsistent).await;

    let client = client_at(Some(10));
    let generation = client.generation();
    let status = refresh_zone(&client, vec![candidate(addr, Method::Ixfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert_eq!(counts.ixfr.load(Ordering::SeqCst), 1);
    assert_eq!(counts.axfr.load(Ordering::SeqCst), 2);
    assert_eq!(client.current_serial(), Some(10));
    assert_eq!(client.generation(), generation);

    server.abort();
}

#[tokio::test]
async fn full_transfer_older_than_ours_is_rejected() {
    // The SOA answer claims 15, but the zone sent is at 5.
    fn older_zone(kind: &QueryKind) -> Option<Vec<Record>> {
        Some(match kind {
            QueryKind::Soa => vec![soa(15)],
            _ => vec![
                soa(5),
                record("www.example.", Type::A, vec![192, 0, 2, 80]),
                soa(5),
            ],
        })
    }
    let (addr, counts, server) = start_scripted(older_zone).await;

    let client = client_at(Some(10));
    let generation = client.generation();
    let status = refresh_zone(&client, vec![candidate(addr, Method::Axfr)], &config())
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Failed);
    assert_eq!(counts.axfr.load(Ordering::SeqCst), 1);
    assert_eq!(client.current_serial(), Some(10));
    assert_eq!(client.generation(), generation);
    assert!(has_record(&client, &version_txt(10)));
    assert!(!client.flags().notify_pending);

    server.abort();
}

#[tokio::test]
async fn silent_server_times_out() {
    fn silent(_: &QueryKind) -> Option<Vec<Record>> {
        None
    }
    let (addr, _, server) = start_scripted(silent).await;

    let client = client_at(Some(10));
    let config = PullConfig {
        first_read_timeout: Duration::from_millis(200),
        ..config()
    };
    let started = Instant::now();
    let status = refresh_zone(&client, vec![candidate(addr, Method::Ixfr)], &config)
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.current_serial(), Some(10));

    server.abort();
}

#[tokio::test]
async fn stalled_transfer_hits_total_timeout() {
    // The SOA query is answered, but the transfer never is.
    fn stalls(kind: &QueryKind) -> Option<Vec<Record>> {
        match kind {
            QueryKind::Soa => Some(vec![soa(15)]),
            _ => None,
        }
    }
    let (addr, counts, server) = start_scripted(stalls).await;

    let client = client_at(Some(10));
    let config = PullConfig {
        first_read_timeout: Duration::from_secs(20),
        read_timeout: Duration::from_secs(20),
        total_timeout: Duration::from_millis(500),
        ..config()
    };
    let started = Instant::now();
    let status = refresh_zone(&client, vec![candidate(addr, Method::Ixfr)], &config)
        .await
        .unwrap();
    assert_eq!(status, PullStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(counts.ixfr.load(Ordering::SeqCst), 1);
    assert_eq!(client.current_serial(), Some(10));

    server.abort();
}
