//! Client and server roles of every scenario.

use std::io;
use std::time::Duration;

use faultline_core::effects::{
    CorruptPayload, DropEveryOther, Duplication, FinHygiene, InFlightWindow, Passthrough, Recorder,
    ReorderReceived, Replayer, SegmentLengthGuard, SteadyWindow, SynHygiene,
};
use faultline_core::errors::InvariantViolation;
use faultline_core::io::StreamReader;
use faultline_core::segment::PAYLOAD_SIZE;
use faultline_core::transport::{
    ClientSocket, ServerSocket, TransportError, TransportFactory, TransportSocket,
};

use super::{Scenario, ScenarioContext};
use crate::orchestrator::{OrchestratorError, Role, RoleBarrier, RoleContext};

type Roles = Result<Vec<Role>, OrchestratorError>;

const HELLO: &[u8] = b"Hello world!";
const HELLO_AGAIN: &[u8] = b"Hello world, again!";

/// Messages exchanged in the large transfer.
const LARGE_COUNT: usize = 0x10000;

/// Pause giving a misbehaving sender the chance to overflow its window.
const OVERFLOW_GRACE: Duration = Duration::from_millis(500);

fn secs(seconds: u64) -> Option<Duration> {
    Some(Duration::from_secs(seconds))
}

/// Every scenario, in difficulty order.
pub(super) fn all<F: TransportFactory + 'static>() -> Vec<Scenario<F>> {
    vec![
        Scenario::new("00_segment_length", 0, None, segment_length),
        Scenario::new("10_connect", 10, None, connect),
        Scenario::new("11_hello_world", 11, None, hello_world),
        Scenario::new("15_old_segments", 15, secs(10), old_segments),
        Scenario::new("20_also_close", 20, None, also_close),
        Scenario::new("21_duplication", 21, secs(5), duplication),
        Scenario::new("21_duplication_no_shutdown", 21, secs(5), duplication_no_shutdown),
        Scenario::new("22_corrupted_duplicates", 22, secs(5), corrupted_duplicates),
        Scenario::new(
            "22_corrupted_duplicates_no_shutdown",
            22,
            secs(5),
            corrupted_duplicates_no_shutdown,
        ),
        Scenario::new("30_reordering", 30, secs(5), reordering),
        Scenario::new("30_reordering_no_shutdown", 30, secs(5), reordering_no_shutdown),
        Scenario::new("31_syns", 31, secs(5), syns),
        Scenario::new("32_fins", 32, secs(5), fins),
        Scenario::new("40_large", 40, secs(60), large),
        Scenario::new("60_drop_every_other", 60, secs(10), drop_every_other),
        Scenario::new(
            "60_drop_every_other_no_shutdown",
            60,
            secs(10),
            drop_every_other_no_shutdown,
        ),
        Scenario::new("61_window_in_flight", 61, secs(5), window_in_flight),
        Scenario::new(
            "61_window_in_flight_no_shutdown",
            61,
            secs(5),
            window_in_flight_no_shutdown,
        ),
        Scenario::new("62_window", 62, secs(5), steady_window),
        Scenario::new("70_drop_every_other_ack", 70, secs(10), drop_every_other_ack),
        Scenario::new(
            "70_drop_every_other_ack_no_shutdown",
            70,
            secs(10),
            drop_every_other_ack_no_shutdown,
        ),
        Scenario::new("80_drop_every_other_always", 80, secs(10), drop_every_other_always),
        Scenario::new(
            "80_drop_every_other_always_no_shutdown",
            80,
            secs(10),
            drop_every_other_always_no_shutdown,
        ),
        Scenario::new("90_reconnect", 90, secs(10), reconnect),
    ]
}

/// How a scenario ends once the payload went through.
#[derive(Debug, Clone)]
enum Ending {
    /// The client terminates the connection and the server observes closure
    Shutdown,
    /// Both roles meet at a barrier with the connection still open
    Barrier(RoleBarrier),
}

impl Ending {
    fn barrier() -> io::Result<Self> {
        Ok(Ending::Barrier(RoleBarrier::new(2)?))
    }

    fn client<S: ClientSocket>(&self, socket: &mut S, ctx: &RoleContext) -> anyhow::Result<()> {
        match self {
            Ending::Shutdown => socket.shutdown()?,
            Ending::Barrier(barrier) => barrier.wait(ctx)?,
        }
        Ok(())
    }

    fn server<S: ServerSocket>(
        &self,
        socket: &mut S,
        reader: &mut StreamReader,
        ctx: &RoleContext,
    ) -> anyhow::Result<()> {
        match self {
            Ending::Shutdown => reader.expect_closed(socket, None)?,
            Ending::Barrier(barrier) => barrier.wait(ctx)?,
        }
        Ok(())
    }
}

fn pair(
    client: impl FnOnce(&RoleContext) -> anyhow::Result<()> + 'static,
    server: impl FnOnce(&RoleContext) -> anyhow::Result<()> + 'static,
) -> Vec<Role> {
    vec![Role::new("client", client), Role::new("server", server)]
}

/// Offers `data` without waiting, returning how much the socket accepted.
fn offer<S>(socket: &mut S, data: &[u8]) -> Result<usize, TransportError>
where
    S: TransportSocket + ?Sized,
{
    let mut offset = 0;
    while offset < data.len() {
        let accepted = socket.send(&data[offset..])?;
        if accepted == 0 {
            break;
        }
        offset += accepted;
    }
    Ok(offset)
}

fn numbered(i: usize) -> Vec<u8> {
    format!("Hello world {i}!").into_bytes()
}

fn full_segments(count: u8) -> Vec<Vec<u8>> {
    (1..=count).map(|i| vec![b'0' + i; PAYLOAD_SIZE]).collect()
}

fn segment_length<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let segment_size = ctx.effects.segment_size;
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        let guard = c
            .effects()
            .activate(|inner| SegmentLengthGuard::with_size(inner, segment_size));
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        c.shutdown()?;
        client_barrier.wait(rctx)?;
        guard.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        while !s.recv()?.is_empty() {}
        barrier.wait(rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn connect<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config) = (ctx.factory.clone(), ctx.socket);
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        client_barrier.wait(rctx)?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        barrier.wait(rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn hello_world<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        client_barrier.wait(rctx)?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        StreamReader::new().expect(&mut s, HELLO)?;
        barrier.wait(rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// Replays segments of a finished connection into a new one. Only
/// implementations that reuse initial sequence numbers get confused.
fn old_segments<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        let recorder = c.effects().activate(Recorder::new);
        writer.send_all(&mut c, HELLO)?;
        c.shutdown()?;
        c.close()?;
        client_barrier.wait(rctx)?;
        let recording = recorder.snapshot();
        recorder.deactivate()?;

        let mut c = factory.client(&config)?;
        c.connect()?;
        // The server is accepting again before the replay starts.
        client_barrier.wait(rctx)?;
        let replay = c.effects().activate(move |inner| Replayer::new(inner, recording));
        writer.send_all(&mut c, HELLO_AGAIN)?;
        replay.wait();
        replay.deactivate()?;
        c.shutdown()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        let mut reader = StreamReader::new();
        reader.expect(&mut s, HELLO)?;
        reader.expect_closed(&mut s, None)?;
        s.close()?;
        barrier.wait(rctx)?;

        let mut s = factory.server(&config)?;
        let mut reader = StreamReader::new();
        s.accept()?;
        barrier.wait(rctx)?;
        reader.expect_closed(&mut s, Some(HELLO_AGAIN))?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// No barrier: shutdown alone must get the final acknowledgements out.
fn also_close<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        c.shutdown()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        StreamReader::new().expect_closed(&mut s, Some(HELLO))?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// Payloads of the duplication scenarios; the shutdown variant sends one.
fn duplication_messages(ending: &Ending) -> Vec<Vec<u8>> {
    match ending {
        Ending::Shutdown => vec![HELLO.to_vec()],
        Ending::Barrier(_) => vec![numbered(1), numbered(2)],
    }
}

fn duplication_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let messages = duplication_messages(&ending);
    let (client_ending, client_messages) = (ending.clone(), messages.clone());
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        let guard = c.effects().activate(Duplication::new);
        c.connect()?;
        for message in &client_messages {
            writer.send_all(&mut c, message)?;
        }
        client_ending.client(&mut c, rctx)?;
        guard.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        let mut reader = StreamReader::new();
        for message in &messages {
            reader.expect(&mut s, message)?;
        }
        ending.server(&mut s, &mut reader, rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn duplication<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    duplication_with(ctx, Ending::Shutdown)
}

fn duplication_no_shutdown<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    duplication_with(ctx, Ending::barrier()?)
}

/// Every received segment arrives twice, the first copy with a corrupted
/// payload. Only a working checksum tells them apart; no retransmission is
/// needed.
fn corrupted_duplicates_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        client_ending.client(&mut c, rctx)?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let guard = s.effects().activate(|inner| {
            Duplication::with_branches(inner, CorruptPayload::new, Passthrough::new)
        });
        s.accept()?;
        let mut reader = StreamReader::new();
        reader.expect(&mut s, HELLO)?;
        ending.server(&mut s, &mut reader, rctx)?;
        guard.deactivate()?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn corrupted_duplicates<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    corrupted_duplicates_with(ctx, Ending::Shutdown)
}

fn corrupted_duplicates_no_shutdown<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
) -> Roles {
    corrupted_duplicates_with(ctx, Ending::barrier()?)
}

/// Fails for implementations that do not track sequence numbers.
fn reordering_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        writer.send_all(&mut c, &numbered(1))?;
        writer.send_all(&mut c, &numbered(2))?;
        client_ending.client(&mut c, rctx)?;
        Ok(())
    };

    let (factory, hold_ticks) = (ctx.factory.clone(), ctx.effects.reorder_hold_ticks);
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        let mut reader = StreamReader::new();
        let guard = s
            .effects()
            .activate(|inner| ReorderReceived::with_hold_ticks(inner, hold_ticks));
        reader.expect(&mut s, &numbered(1))?;
        reader.expect(&mut s, &numbered(2))?;
        guard.deactivate()?;
        ending.server(&mut s, &mut reader, rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn reordering<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    reordering_with(ctx, Ending::Shutdown)
}

fn reordering_no_shutdown<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    reordering_with(ctx, Ending::barrier()?)
}

/// Fails when the first segment of either peer lacks SYN, or a later one has it.
fn syns<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        let guard = c.effects().activate(SynHygiene::new);
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        client_barrier.wait(rctx)?;
        guard.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let guard = s.effects().activate(SynHygiene::new);
        s.accept()?;
        StreamReader::new().expect(&mut s, HELLO)?;
        barrier.wait(rctx)?;
        guard.deactivate()?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// Fails when a peer never sends FIN, or sends new data after it.
fn fins<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        let watch = c.effects().activate(FinHygiene::new);
        c.connect()?;
        writer.send_all(&mut c, HELLO)?;
        c.shutdown()?;
        if !watch.fin_sent() {
            return Err(InvariantViolation::MissingFin {
                role: "Client".to_string(),
            }
            .into());
        }
        watch.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let watch = s.effects().activate(FinHygiene::new);
        s.accept()?;
        StreamReader::new().expect_closed(&mut s, Some(HELLO))?;
        if !watch.fin_sent() {
            return Err(InvariantViolation::MissingFin {
                role: "Server".to_string(),
            }
            .into());
        }
        watch.deactivate()?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn large_message(i: usize) -> Vec<u8> {
    format!("#{} of {LARGE_COUNT}", i + 1).into_bytes()
}

fn large<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        for i in 0..LARGE_COUNT {
            if i % 1000 == 0 {
                tracing::info!("sent {i} out of {LARGE_COUNT}");
            }
            writer.send_all(&mut c, &large_message(i))?;
        }
        client_barrier.wait(rctx)?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        s.accept()?;
        let mut reader = StreamReader::new();
        for i in 0..LARGE_COUNT {
            reader.expect(&mut s, &large_message(i))?;
        }
        barrier.wait(rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// Once connected, the server only ever sees retransmissions.
fn drop_every_other_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        for i in 0..2 {
            writer.send_all(&mut c, &numbered(i))?;
        }
        client_ending.client(&mut c, rctx)?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let mut reader = StreamReader::new();
        s.accept()?;
        let guard = s.effects().activate(DropEveryOther::new);
        for i in 0..2 {
            reader.expect(&mut s, &numbered(i))?;
        }
        guard.deactivate()?;
        ending.server(&mut s, &mut reader, rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn drop_every_other<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    drop_every_other_with(ctx, Ending::Shutdown)
}

fn drop_every_other_no_shutdown<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
) -> Roles {
    drop_every_other_with(ctx, Ending::barrier()?)
}

/// Holds the client's segments in flight; fails when it sends more new
/// data segments than the server's window of three allows.
fn window_in_flight_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, writer) = (ctx.factory.clone(), ctx.writer);
    let (client_config, server_config) = (ctx.with_window(100), ctx.with_window(3));
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&client_config)?;
        c.connect()?;
        let window = c.effects().activate(|inner| InFlightWindow::new(inner, 3));
        let data = full_segments(4).concat();
        let accepted = offer(&mut c, &data)?;
        std::thread::sleep(OVERFLOW_GRACE);
        window.release();
        writer.send_all(&mut c, &data[accepted..])?;
        client_ending.client(&mut c, rctx)?;
        window.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&server_config)?;
        s.accept()?;
        let mut reader = StreamReader::new();
        for segment in full_segments(4) {
            reader.expect(&mut s, &segment)?;
        }
        ending.server(&mut s, &mut reader, rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn window_in_flight<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    window_in_flight_with(ctx, Ending::Shutdown)
}

fn window_in_flight_no_shutdown<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
) -> Roles {
    window_in_flight_with(ctx, Ending::barrier()?)
}

/// The server's application does not read until the barrier, so the client
/// must honour the window the server advertises in its acknowledgements.
fn steady_window<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let barrier = RoleBarrier::new(2)?;
    let (factory, writer) = (ctx.factory.clone(), ctx.writer);
    let (client_config, server_config) = (ctx.with_window(100), ctx.with_window(3));
    let client_barrier = barrier.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&client_config)?;
        c.connect()?;
        let window = c.effects().activate(|inner| SteadyWindow::new(inner, 3));
        let data = full_segments(4).concat();
        let accepted = offer(&mut c, &data)?;
        std::thread::sleep(OVERFLOW_GRACE);
        client_barrier.wait(rctx)?;
        window.stop();
        writer.send_all(&mut c, &data[accepted..])?;
        c.shutdown()?;
        window.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&server_config)?;
        s.accept()?;
        barrier.wait(rctx)?;
        let mut reader = StreamReader::new();
        for segment in full_segments(4) {
            reader.expect(&mut s, &segment)?;
        }
        reader.expect_closed(&mut s, None)?;
        Ok(())
    };
    Ok(pair(client, server))
}

/// Once connected, the client only ever sees retransmitted acknowledgements.
fn drop_every_other_ack_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        c.connect()?;
        let guard = c.effects().activate(DropEveryOther::new);
        for i in 0..3 {
            writer.send_all(&mut c, &numbered(i))?;
        }
        client_ending.client(&mut c, rctx)?;
        guard.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let mut reader = StreamReader::new();
        s.accept()?;
        for i in 0..3 {
            reader.expect(&mut s, &numbered(i))?;
        }
        ending.server(&mut s, &mut reader, rctx)?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn drop_every_other_ack<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    drop_every_other_ack_with(ctx, Ending::Shutdown)
}

fn drop_every_other_ack_no_shutdown<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
) -> Roles {
    drop_every_other_ack_with(ctx, Ending::barrier()?)
}

/// Both peers only ever see retransmissions, handshake included.
fn drop_every_other_always_with<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
    ending: Ending,
) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client_ending = ending.clone();
    let client = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        let guard = c.effects().activate(DropEveryOther::new);
        c.connect()?;
        for i in 0..3 {
            writer.send_all(&mut c, &numbered(i))?;
        }
        client_ending.client(&mut c, rctx)?;
        guard.deactivate()?;
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |rctx: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let mut reader = StreamReader::new();
        let guard = s.effects().activate(DropEveryOther::new);
        s.accept()?;
        for i in 0..3 {
            reader.expect(&mut s, &numbered(i))?;
        }
        ending.server(&mut s, &mut reader, rctx)?;
        guard.deactivate()?;
        Ok(())
    };
    Ok(pair(client, server))
}

fn drop_every_other_always<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    drop_every_other_always_with(ctx, Ending::Shutdown)
}

fn drop_every_other_always_no_shutdown<F: TransportFactory + 'static>(
    ctx: &ScenarioContext<F>,
) -> Roles {
    drop_every_other_always_with(ctx, Ending::barrier()?)
}

fn reconnect<F: TransportFactory + 'static>(ctx: &ScenarioContext<F>) -> Roles {
    let (factory, config, writer) = (ctx.factory.clone(), ctx.socket, ctx.writer);
    let client = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut c = factory.client(&config)?;
        for message in [HELLO, HELLO_AGAIN] {
            c.connect()?;
            writer.send_all(&mut c, message)?;
            c.shutdown()?;
        }
        Ok(())
    };

    let factory = ctx.factory.clone();
    let server = move |_: &RoleContext| -> anyhow::Result<()> {
        let mut s = factory.server(&config)?;
        let mut reader = StreamReader::new();
        for message in [HELLO, HELLO_AGAIN] {
            s.accept()?;
            reader.expect_closed(&mut s, Some(message))?;
        }
        Ok(())
    };
    Ok(pair(client, server))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_segments_fill_payload() {
        let segments = full_segments(4);
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.len() == PAYLOAD_SIZE));
        assert_eq!(segments[0][0], b'1');
        assert_eq!(segments[3][PAYLOAD_SIZE - 1], b'4');
    }

    #[test]
    fn test_large_messages_numbered_from_one() {
        assert_eq!(large_message(0), b"#1 of 65536");
        assert_eq!(large_message(LARGE_COUNT - 1), b"#65536 of 65536");
    }

    #[test]
    fn test_duplication_shutdown_sends_single_greeting() {
        assert_eq!(duplication_messages(&Ending::Shutdown), vec![HELLO.to_vec()]);

        let kept_open = duplication_messages(&Ending::barrier().unwrap());
        assert_eq!(kept_open, vec![numbered(1), numbered(2)]);
    }

    #[test]
    fn test_barrier_ending_has_two_parties() {
        match Ending::barrier().unwrap() {
            Ending::Barrier(barrier) => assert_eq!(barrier.parties(), 2),
            Ending::Shutdown => panic!("expected a barrier ending"),
        }
    }
}
