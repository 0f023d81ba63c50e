//! Connection supervisor (C9, §4.7). Grounded verbatim on the teacher's
//! `ws_server.rs` (`TcpListener::bind`, `listener.incoming()`, one
//! `thread::spawn` per accepted stream) and on `main.rs`'s
//! `ctrlc::set_handler` + `BarrierFlag` shutdown signal, kept from
//! `util.rs`. Each worker owns a buffered reader over its half of the
//! socket and a `ClientSession`; the other half is registered with
//! `AppState` as a `ClientSink` so PUBLISH/MONITOR fan-out from other
//! threads can reach it.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::client::{next_client_id, ClientSession, ClientSink};
use crate::dispatch::dispatch;
use crate::resp;
use crate::state::AppState;
use crate::util::BarrierFlag;

/// Runs the accept loop until `shutdown` is raised. Blocks the calling
/// thread; spawns one worker thread per accepted connection and joins them
/// all before returning.
pub fn run(state: Arc<AppState>, shutdown: Arc<BarrierFlag>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.network.port);
    let listener = TcpListener::bind(&addr)?;
    // Poll for shutdown between accepts rather than blocking forever, so
    // Ctrl-C can unstick the accept loop without OS-specific listener
    // shutdown calls.
    listener.set_nonblocking(true)?;
    log::info!("listening on {addr}");

    let mut workers = Vec::new();
    while !shutdown.is_raised() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let st = state.clone();
                let name = format!("client-{peer}");
                let handle = thread::Builder::new()
                    .name(name)
                    .spawn(move || handle_connection(st, stream, peer.to_string()))
                    .expect("spawning client worker thread");
                workers.push(handle);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::warn!("accept failed: {e}");
            }
        }
        workers.retain(|h| !h.is_finished());
    }

    log::info!("listener closing, waiting for {} active connections", workers.len());
    // Unblock every in-flight client read so its worker thread can observe
    // `shutdown` and exit instead of waiting forever on its next command.
    for sink in state.clients.lock().unwrap().values() {
        sink.shutdown();
    }
    for h in workers {
        let _ = h.join();
    }
    Ok(())
}

fn handle_connection(state: Arc<AppState>, stream: TcpStream, addr: String) {
    let id = next_client_id();
    let writer = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to clone client socket for {addr}: {e}");
            return;
        }
    };
    let sink = Arc::new(ClientSink::new(writer));
    state.register_client(id, sink.clone());

    let mut session = ClientSession::new(id, addr.clone());
    let mut reader = BufReader::new(stream);

    loop {
        match resp::read_command(&mut reader) {
            Ok(Some(args)) => {
                if args.is_empty() {
                    continue;
                }
                let replies = dispatch(&state, &mut session, args);
                for reply in replies {
                    if let Err(e) = sink.send(&reply) {
                        log::debug!("write to {addr} failed, closing: {e}");
                        state.unregister_client(id);
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("protocol error from {addr}, closing connection: {e}");
                break;
            }
        }
    }
    state.unregister_client(id);
}
