//! 协程控制器与事件桥接的端到端场景：脚本化宿主逐事件驱动。

mod support;

use std::io;

use proptest::prelude::*;
use spark_script::{
    ConfigScope, Interest, Interpreter, Invocation, IoStatus, LocationScope, PhaseKind,
    PhaseStatus, RecvLimit, RequestContext, ResumeOutcome, ScriptEngine, TimerSlot, UpstreamEvent,
};
use tracing_test::traced_test;

use support::programs::{
    content, engine_with, register_double_close, register_echo, register_nap, register_recv_sync,
};
use support::{Dial, ScriptedHost, fire};

fn drain(ctx: &mut RequestContext) -> Vec<u8> {
    ctx.output_mut().drain().to_vec()
}

#[test]
fn unreachable_literal_address_finishes_the_phase() {
    let mut engine = engine_with(|interp| register_echo(interp, "echo", "127.0.0.1:1"));
    let mut host = ScriptedHost::with_dials([Dial::Fail(io::ErrorKind::ConnectionRefused)]);
    let mut ctx = RequestContext::new();

    let status = engine.run_phase(&mut ctx, &mut host, &content("echo"), PhaseKind::Content);

    assert_eq!(status, PhaseStatus::Done);
    assert_eq!(ctx.phase_status(), PhaseStatus::Done);
    let error = ctx
        .upstream()
        .and_then(|conn| conn.last_error())
        .expect("connect error recorded");
    assert_eq!(error.code(), "spark.script.upstream.connect_failed");
    assert_eq!(drain(&mut ctx), b"connect failed");
    assert_eq!(engine.interpreter().live_handles(), 0);
    assert!(host.resolves.is_empty());
}

#[test]
fn echo_suspends_once_and_finishes_after_read_event() {
    let mut engine = engine_with(|interp| register_echo(interp, "echo", "127.0.0.1:7000"));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    let mut ctx = RequestContext::new();

    let status = engine.run_phase(&mut ctx, &mut host, &content("echo"), PhaseKind::Content);
    assert_eq!(status, PhaseStatus::Suspended);
    assert_eq!(host.written(), b"hello");
    assert!(host.is_armed(Interest::Read));
    assert!(host.timers.contains_key(&TimerSlot::Read));
    assert_eq!(ctx.recv_slot().status(), IoStatus::Again);

    host.push_inbound(b"hello");
    fire(&mut host, Interest::Read);
    let outcome = engine.dispatch_event(&mut ctx, &mut host, UpstreamEvent::Readable);

    assert_eq!(outcome, ResumeOutcome::Done);
    assert_eq!(ctx.phase_status(), PhaseStatus::Done);
    assert_eq!(drain(&mut ctx), b"hello");
    assert_eq!(ctx.stats().events, 1);
    assert_eq!(ctx.stats().resumes, 1);
    assert_eq!(host.run_phases, 1);
    assert!(!host.timers.contains_key(&TimerSlot::Read));
    assert_eq!(engine.interpreter().live_handles(), 0);
}

#[test]
fn recv_sync_delivers_only_the_complete_payload() {
    let mut engine =
        engine_with(|interp| register_recv_sync(interp, "sync", RecvLimit::Exactly(10)));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    let mut ctx = RequestContext::new();

    let status = engine.run_phase(&mut ctx, &mut host, &content("sync"), PhaseKind::Content);
    assert_eq!(status, PhaseStatus::Suspended);

    for (index, byte) in b"0123456789".iter().enumerate() {
        assert!(
            ctx.recv_slot().peek().is_none(),
            "partial data surfaced at {index}"
        );
        host.push_inbound(&[*byte]);
        fire(&mut host, Interest::Read);
        let outcome = engine.dispatch_event(&mut ctx, &mut host, UpstreamEvent::Readable);
        if index < 9 {
            assert_eq!(outcome, ResumeOutcome::Suspended);
            assert_eq!(ctx.recv_slot().status(), IoStatus::Again);
        } else {
            assert_eq!(outcome, ResumeOutcome::Done);
        }
    }

    assert_eq!(drain(&mut ctx), b"0123456789");
    assert_eq!(ctx.stats().events, 10);
    assert_eq!(ctx.stats().resumes, 10);
}

#[test]
fn recv_sync_to_eof_concatenates_chunks() {
    let mut engine = engine_with(|interp| register_recv_sync(interp, "sync", RecvLimit::ToEof));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    host.push_inbound(b"ab");
    let mut ctx = RequestContext::new();

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &content("sync"), PhaseKind::Content),
        PhaseStatus::Suspended
    );
    host.push_inbound(b"cd");
    host.peer().borrow_mut().eof = true;
    fire(&mut host, Interest::Read);
    assert_eq!(
        engine.dispatch_event(&mut ctx, &mut host, UpstreamEvent::Readable),
        ResumeOutcome::Done
    );
    assert_eq!(drain(&mut ctx), b"abcd");
}

#[test]
fn recv_sync_discards_data_on_premature_eof() {
    let mut engine =
        engine_with(|interp| register_recv_sync(interp, "sync", RecvLimit::Exactly(4)));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    host.push_inbound(b"ab");
    host.peer().borrow_mut().eof = true;
    let mut ctx = RequestContext::new();

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &content("sync"), PhaseKind::Content),
        PhaseStatus::Done
    );
    assert_eq!(drain(&mut ctx), b"recv_sync failed");
    assert_eq!(
        ctx.upstream()
            .and_then(|conn| conn.last_error())
            .map(|err| err.code()),
        Some("spark.script.upstream.premature_eof")
    );
}

#[test]
#[traced_test]
fn disconnect_while_suspended_is_cleaned_up_exactly_once() {
    let mut engine = engine_with(|interp| register_echo(interp, "echo", "127.0.0.1:7000"));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    let mut ctx = RequestContext::new();

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &content("echo"), PhaseKind::Content),
        PhaseStatus::Suspended
    );

    ctx.mark_end_of_request();
    host.push_inbound(b"late");
    fire(&mut host, Interest::Read);
    assert_eq!(
        engine.dispatch_event(&mut ctx, &mut host, UpstreamEvent::Readable),
        ResumeOutcome::Aborted
    );
    assert!(logs_contain("resume after end of request"));
    assert!(ctx.has_unit(), "cleanup belongs to exit");
    assert!(drain(&mut ctx).is_empty());

    engine.exit(&mut ctx, &mut host);
    engine.exit(&mut ctx, &mut host);
    assert_eq!(host.released, 1);
    assert!(!ctx.has_unit());
    assert!(!ctx.has_upstream());
    assert_eq!(engine.interpreter().live_handles(), 0);

    assert_eq!(
        engine.dispatch_event(&mut ctx, &mut host, UpstreamEvent::Readable),
        ResumeOutcome::NoUnit
    );
    assert_eq!(host.released, 1);
}

#[test]
fn finalize_request_seals_output_and_releases_everything() {
    let mut engine = engine_with(|interp| register_echo(interp, "echo", "127.0.0.1:7000"));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    let mut ctx = RequestContext::new();
    engine.run_phase(&mut ctx, &mut host, &content("echo"), PhaseKind::Content);

    engine.finalize_request(&mut ctx, &mut host);

    assert!(ctx.is_end_of_request());
    assert!(ctx.output().is_last());
    assert!(!ctx.has_unit());
    assert!(!ctx.has_upstream());
    assert!(host.timers.is_empty());
}

#[test]
fn every_wakeup_resumes_exactly_once() {
    let mut engine = engine_with(|interp| register_nap(interp, "nap", 3));
    let mut host = ScriptedHost::default();
    let mut ctx = RequestContext::new();

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &content("nap"), PhaseKind::Content),
        PhaseStatus::Suspended
    );
    assert!(host.timers.contains_key(&TimerSlot::Sleep));

    let outcomes: Vec<_> = (0..3)
        .map(|_| engine.dispatch_sleep(&mut ctx, &mut host))
        .collect();
    assert_eq!(
        outcomes,
        [
            ResumeOutcome::Suspended,
            ResumeOutcome::Suspended,
            ResumeOutcome::Done
        ]
    );
    assert_eq!(ctx.stats().events, 3);
    assert_eq!(ctx.stats().resumes, 3);
    assert_eq!(drain(&mut ctx), b"awake");
}

#[test]
fn closing_twice_is_a_no_op() {
    let mut engine = engine_with(|interp| register_double_close(interp, "close"));
    let mut host = ScriptedHost::with_dials([Dial::Immediate]);
    let mut ctx = RequestContext::new();

    let status = engine.run_phase(&mut ctx, &mut host, &content("close"), PhaseKind::Content);

    assert_eq!(status, PhaseStatus::Done);
    assert_eq!(drain(&mut ctx), b"closed");
    assert_eq!(host.released, 1);
    assert!(!ctx.has_upstream());
}

#[test]
fn log_phase_cannot_stay_suspended() {
    let mut engine = engine_with(|interp| register_nap(interp, "nap", 1));
    let mut host = ScriptedHost::default();
    let mut ctx = RequestContext::new();
    let location = LocationScope::new("/log").with_fragment(PhaseKind::Log, "nap");

    let status = engine.run_phase(&mut ctx, &mut host, &location, PhaseKind::Log);

    assert_eq!(status, PhaseStatus::Done);
    assert_eq!(ctx.phase_status(), PhaseStatus::Done);
    assert!(!ctx.has_unit());
    assert!(!host.timers.contains_key(&TimerSlot::Sleep));
    assert_eq!(engine.interpreter().live_handles(), 0);
}

#[test]
fn finalize_request_cancels_the_sleep_timer() {
    let mut engine = engine_with(|interp| register_nap(interp, "nap", 2));
    let mut host = ScriptedHost::default();
    let mut ctx = RequestContext::new();
    engine.run_phase(&mut ctx, &mut host, &content("nap"), PhaseKind::Content);
    assert!(host.timers.contains_key(&TimerSlot::Sleep));

    engine.finalize_request(&mut ctx, &mut host);

    assert!(host.timers.is_empty());
    assert!(!ctx.has_unit());
}

#[test]
fn content_entry_resets_request_status_and_missing_fragments_decline() {
    let mut engine = engine_with(|interp| {
        interp.register_program("ok", |_, _| Ok(Invocation::value(true)));
    });
    let mut host = ScriptedHost::default();
    let mut ctx = RequestContext::new();
    let location = content("ok");

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &location, PhaseKind::Access),
        PhaseStatus::Declined
    );
    assert_eq!(ctx.request_status(), PhaseStatus::Done);

    assert_eq!(
        engine.run_phase(&mut ctx, &mut host, &location, PhaseKind::Content),
        PhaseStatus::Done
    );
    assert_eq!(ctx.request_status(), PhaseStatus::Declined);
    assert_eq!(ctx.phase(), Some(PhaseKind::Content));
}

#[test]
fn broken_fragments_are_declined_and_compiled_once() {
    let scope = ConfigScope::from_toml_str(
        r#"
        [[location]]
        name = "/a"
        content = { inline = "ok" }
        access = { inline = "does-not-exist" }
        "#,
    )
    .expect("config");
    let mut engine = ScriptEngine::from_scope(
        {
            let mut interp = spark_script::NativeInterpreter::new();
            interp.register_program("ok", |_, _| Ok(Invocation::value(true)));
            interp
        },
        &scope,
    );

    assert_eq!(engine.precompile(&scope), 1);
    assert_eq!(engine.interpreter().compiled_count(), 1);

    let location = scope.location("/a").expect("location");
    let mut host = ScriptedHost::default();
    for _ in 0..3 {
        let mut ctx = RequestContext::new();
        assert_eq!(
            engine.run_phase(&mut ctx, &mut host, location, PhaseKind::Access),
            PhaseStatus::Declined
        );
        assert_eq!(
            engine.run_phase(&mut ctx, &mut host, location, PhaseKind::Content),
            PhaseStatus::Done
        );
    }
    assert_eq!(engine.interpreter().compiled_count(), 1);
    assert_eq!(engine.fragments().len(), 2);
}

proptest! {
    #[test]
    fn fragments_compile_once_across_requests(requests in 2usize..24) {
        let mut engine = engine_with(|interp| {
            interp.register_program("hello", |_, scope| {
                scope.output("hi");
                Ok(Invocation::value(true))
            });
        });
        for _ in 0..requests {
            let location = content("hello");
            let mut ctx = RequestContext::new();
            let mut host = ScriptedHost::default();
            prop_assert_eq!(
                engine.run_phase(&mut ctx, &mut host, &location, PhaseKind::Content),
                PhaseStatus::Done
            );
            prop_assert_eq!(ctx.output().len(), 2);
        }
        prop_assert_eq!(engine.interpreter().compiled_count(), 1);
        prop_assert_eq!(engine.fragments().len(), 1);
    }

    #[test]
    fn each_event_yields_one_status(naps in 1u32..12) {
        let mut engine = engine_with(|interp| register_nap(interp, "nap", naps));
        let mut host = ScriptedHost::default();
        let mut ctx = RequestContext::new();
        prop_assert_eq!(
            engine.run_phase(&mut ctx, &mut host, &content("nap"), PhaseKind::Content),
            PhaseStatus::Suspended
        );
        let mut done = 0;
        for _ in 0..naps {
            match engine.dispatch_sleep(&mut ctx, &mut host) {
                ResumeOutcome::Suspended => {}
                ResumeOutcome::Done => done += 1,
                other => prop_assert!(false, "unexpected outcome {:?}", other),
            }
            prop_assert!(ctx.stats().units_created <= 1);
        }
        prop_assert_eq!(done, 1);
        prop_assert_eq!(ctx.stats().resumes, u64::from(naps));
    }
}
