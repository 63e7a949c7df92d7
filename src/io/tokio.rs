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

//! Implementation of the Tokio I/O provider.

// NOTE: In this provider, I/O error handling is generally to exit the
// task. The run_with_respawning function acts as a supervisor that will
// respawn the TCP acceptors, possibly after a delay, if they exit with
// an error or a panic.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::timeout;

use super::TransferService;
use crate::message::Rcode;
use crate::xfr::framer::{append_framed, MessageReader, ReadError};
use crate::xfr::push::{Progress, PushSession};
use crate::xfr::request::{parse_request, QueryKind, Refusal, RequestError};

/// A Tokio I/O provider.
///
/// This provider uses asynchronous I/O and serves transfers by spawning
/// tasks on a Tokio runtime: one per listener and one per connection.
///
/// The `TokioIoProvider` supports graceful shutdown. To initiate a
/// graceful shutdown, use the [`TokioShutdownController`] returned by
/// [`TokioIoProvider::start`].
pub struct TokioIoProvider {
    tcp_listeners: Vec<TcpListener>,
}

impl TokioIoProvider {
    /// Creates a new `TokioIoProvider`. This call binds TCP sockets in
    /// preparation, but does not start serving. This function requires
    /// that the Tokio runtime be active.
    pub async fn bind<T>(tcp_addrs: T) -> io::Result<Self>
    where
        T: IntoIterator<Item = SocketAddr>,
    {
        let mut tcp_listeners = Vec::new();
        for addr in tcp_addrs {
            let listener = TcpListener::bind(addr).await?;
            tcp_listeners.push(listener);
        }
        Ok(Self { tcp_listeners })
    }

    /// Returns the addresses actually bound (useful when binding to
    /// port 0).
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.tcp_listeners.iter().map(TcpListener::local_addr).collect()
    }

    /// Starts serving on the active Tokio runtime.
    ///
    /// This spawns tasks on the active Tokio runtime and then returns
    /// a [`TokioShutdownController`] that can be used to shut down the
    /// tasks at a later time. (The [`TokioShutdownController`] must be
    /// held as long as the server should be running, since dropping it
    /// will trigger shutdown.)
    pub fn start(self, service: &Arc<TransferService>) -> TokioShutdownController {
        let (shutdown_controller, shutdown_handle) = make_shutdown_channels();
        let shared = Arc::new(Shared {
            service: service.clone(),
            sessions: Arc::new(Semaphore::new(service.limits().max_sessions)),
        });

        for tcp_listener in self.tcp_listeners {
            let shutdown_handle = shutdown_handle.clone();
            let tcp_listener = Arc::new(tcp_listener);
            tokio::spawn(run_with_respawning(
                run_tcp_listener,
                shutdown_handle,
                shared.clone(),
                tcp_listener,
            ));
        }

        shutdown_controller
    }
}

/// What the connection tasks share.
struct Shared {
    service: Arc<TransferService>,

    /// One permit per transfer allowed to run at once.
    sessions: Arc<Semaphore>,
}

/// How long to wait between respawns of a task. This is to prevent
/// tasks that crash immediately from using up significant CPU time.
const TASK_RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Runs a Tokio task, respawning it if it returns an I/O error, is
/// cancelled, or panics.
async fn run_with_respawning<F, G, S>(
    f: F,
    mut shutdown: ShutdownHandle,
    shared: Arc<Shared>,
    socket: S,
) where
    F: Fn(ShutdownHandle, Arc<Shared>, S) -> G,
    G: Future<Output = io::Result<()>> + Send + 'static,
    S: Clone,
{
    loop {
        let last_spawn_time = Instant::now();
        match tokio::spawn(f(shutdown.clone(), shared.clone(), socket.clone())).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => log_io_error(e),
            Err(_) => (), // The task panicked or was cancelled.
        }

        // If necessary, wait before respawning, but receive shutdown
        // requests immediately.
        let since_last_spawn = Instant::now().duration_since(last_spawn_time);
        if let Some(duration_to_wait) = TASK_RESPAWN_DELAY.checked_sub(since_last_spawn) {
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                _ = tokio::time::sleep(duration_to_wait) => (),
            }
        }
    }
}

/// The TCP listener/accept loop.
async fn run_tcp_listener(
    mut shutdown: ShutdownHandle,
    shared: Arc<Shared>,
    listener: Arc<TcpListener>,
) -> io::Result<()> {
    loop {
        let (client, client_addr) = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            res = listener.accept() => res?,
        };
        let shutdown = shutdown.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(shutdown, &shared, client, client_addr).await {
                log_io_error(e);
            }
        });
    }
}

/// Handles a TCP connection. A client may send any number of requests
/// over one connection; they are answered one after another.
async fn handle_tcp_connection(
    mut shutdown: ShutdownHandle,
    shared: &Shared,
    socket: TcpStream,
    client_addr: SocketAddr,
) -> io::Result<()> {
    let service = &shared.service;
    let limits = *service.limits();
    let mut reader = MessageReader::new(socket);
    debug!("accepted a connection from {client_addr}");

    loop {
        let message = match reader.next_message(limits.idle_timeout).await {
            Ok(message) => message,
            Err(ReadError::Io(e)) => return Err(e),
            // The connection was closed or timed out.
            Err(_) => return Ok(()),
        };

        let request = match parse_request(message, &service.keyring()) {
            Ok(request) => request,
            Err(RequestError::Refused(refusal)) => {
                send_refusal(reader.get_mut(), &refusal, limits.idle_timeout).await?;
                continue;
            }
            Err(RequestError::Unanswerable) => {
                debug!("closing the connection from {client_addr}: unanswerable message");
                return Ok(());
            }
        };

        // SOA queries don't count against the session limit.
        let _permit = if request.kind == QueryKind::Soa {
            None
        } else {
            match shared.sessions.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    info!(
                        "refused {} for {} from {client_addr}: too many transfers running",
                        request.kind, request.question.qname
                    );
                    let refusal = request.refuse(Rcode::Refused);
                    send_refusal(reader.get_mut(), &refusal, limits.idle_timeout).await?;
                    continue;
                }
            }
        };

        let mut session = match PushSession::accept(
            service.catalog(),
            request,
            limits.max_message_len,
        ) {
            Ok(session) => session,
            Err(refusal) => {
                send_refusal(reader.get_mut(), &refusal, limits.idle_timeout).await?;
                continue;
            }
        };

        loop {
            let progress = match session.resume() {
                Ok(progress) => progress,
                Err(e) => {
                    warn!("aborted a transfer to {client_addr}: {e}");
                    return Ok(());
                }
            };
            let output = session.take_output();
            write_with_timeout(reader.get_mut(), &output, limits.idle_timeout).await?;
            if progress == Progress::Done {
                break;
            }

            // Don't hold up shutdown for a long transfer.
            if is_shutting_down(&mut shutdown) {
                return Ok(());
            }
        }
        debug!(
            "finished a transfer to {client_addr}: {} records in {} messages",
            session.records_written(),
            session.messages_written()
        );

        // We won't continue to service this connection if we are
        // shutting down.
        if is_shutting_down(&mut shutdown) {
            return Ok(());
        }
    }
}

/// Writes a single-message refusal.
async fn send_refusal(
    socket: &mut TcpStream,
    refusal: &Refusal,
    idle: Duration,
) -> io::Result<()> {
    let mut output = Vec::new();
    let framed = refusal
        .to_message()
        .map_err(|e| e.to_string())
        .and_then(|message| append_framed(&mut output, &message).map_err(|e| e.to_string()));
    match framed {
        Ok(()) => write_with_timeout(socket, &output, idle).await,
        Err(e) => {
            warn!("failed to build a refusal: {e}");
            Ok(())
        }
    }
}

/// Writes `data` in full, failing if the peer stops reading for
/// `idle`.
async fn write_with_timeout(socket: &mut TcpStream, data: &[u8], idle: Duration) -> io::Result<()> {
    match timeout(idle, socket.write_all(data)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out writing to the client",
        )),
    }
}

fn is_shutting_down(shutdown: &mut ShutdownHandle) -> bool {
    matches!(
        shutdown.request_receiver.try_recv(),
        Err(broadcast::error::TryRecvError::Closed)
    )
}

/// Controls the shutdown of a server's Tokio tasks.
///
/// This type is used to shut down the Tokio tasks spawned by
/// [`TokioIoProvider::start`]. Use
/// [`TokioShutdownController::shut_down`] or its blocking variant,
/// [`TokioShutdownController::blocking_shut_down`], to initiate
/// shutdown and wait for its completion. Dropping the controller will
/// also trigger shutdown (but will not wait for it to complete).
#[must_use]
pub struct TokioShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl TokioShutdownController {
    /// Requests that running server tasks shut down, and then waits for
    /// them to terminate.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }

    /// The blocking variant of [`TokioShutdownController::shut_down`].
    pub fn blocking_shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.blocking_recv();
    }
}

/// A handle held by tasks to interact with the graceful shutdown
/// mechanism.
///
/// This type has two roles:
///
/// 1. It enables tasks to listen for graceful shutdown signals. This
///    is done by waiting for all senders attached to `request_receiver`
///    to close.
/// 2. It prevents graceful shutdown from completing until it is
///    dropped. This is done by holding `wait_sender`. All server tasks
///    therefore own a `ShutdownHandle`.
struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    wait_sender: mpsc::Sender<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses values already queued, but the
        // shutdown signal is all senders being dropped, not a value.
        ShutdownHandle {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`TokioShutdownController`] and an initial
/// [`ShutdownHandle`] connected to it.
fn make_shutdown_channels() -> (TokioShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = TokioShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

/// Logs an I/O error.
fn log_io_error(e: io::Error) {
    error!("I/O error: {e}");
}
