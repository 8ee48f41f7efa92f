//! 测试用脚本程序：以显式状态机编写的阶段例程。

use std::time::Duration;

use spark_script::{
    Invocation, IoStatus, LocationScope, NativeInterpreter, PhaseKind, RecvLimit, ScriptEngine,
    ScriptScope, ScriptValue, SocketConfig, Step,
};

pub fn engine_with(
    register: impl FnOnce(&mut NativeInterpreter),
) -> ScriptEngine<NativeInterpreter> {
    engine_with_socket(SocketConfig::default(), register)
}

pub fn engine_with_socket(
    socket: SocketConfig,
    register: impl FnOnce(&mut NativeInterpreter),
) -> ScriptEngine<NativeInterpreter> {
    let mut interp = NativeInterpreter::new();
    register(&mut interp);
    ScriptEngine::new(interp, socket).expect("valid socket config")
}

/// 只在 content 阶段声明片段的 location。
pub fn content(source: &str) -> LocationScope {
    LocationScope::new("/test").with_fragment(PhaseKind::Content, source)
}

fn fail(scope: &mut ScriptScope<'_>, what: &str) -> Step {
    scope.output(format!("{what} failed"));
    Step::Return(ScriptValue::Bool(false))
}

#[derive(Clone, Copy, Debug)]
enum Echo {
    Connect,
    AwaitConnect,
    Send,
    AwaitSend,
    Recv,
    AwaitRecv,
}

/// 连接 `target`，发送 `hello`，把收到的第一块数据写到输出。
pub fn register_echo(interp: &mut NativeInterpreter, key: &str, target: &'static str) {
    interp.register_program(key, move |_, _| {
        let mut stage = Echo::Connect;
        Ok(Invocation::coroutine(move |scope| {
            loop {
                stage = match stage {
                    Echo::Connect => match scope.connect(target, 80) {
                        IoStatus::Ok => Echo::Send,
                        IoStatus::Again => {
                            stage = Echo::AwaitConnect;
                            return Ok(Step::Yield);
                        }
                        IoStatus::Error => return Ok(fail(scope, "connect")),
                    },
                    Echo::AwaitConnect => match scope.connect_status() {
                        IoStatus::Ok => Echo::Send,
                        IoStatus::Again => return Ok(Step::Yield),
                        IoStatus::Error => return Ok(fail(scope, "connect")),
                    },
                    Echo::Send => match scope.send("hello") {
                        IoStatus::Ok => Echo::Recv,
                        IoStatus::Again => {
                            stage = Echo::AwaitSend;
                            return Ok(Step::Yield);
                        }
                        IoStatus::Error => return Ok(fail(scope, "send")),
                    },
                    Echo::AwaitSend => match scope.send_status() {
                        IoStatus::Ok => Echo::Recv,
                        IoStatus::Again => return Ok(Step::Yield),
                        IoStatus::Error => return Ok(fail(scope, "send")),
                    },
                    Echo::Recv => {
                        let status = scope.recv();
                        if let Some(data) = scope.take_received() {
                            scope.output(data);
                            return Ok(Step::Return(ScriptValue::Bool(true)));
                        }
                        match status {
                            IoStatus::Again => {
                                stage = Echo::AwaitRecv;
                                return Ok(Step::Yield);
                            }
                            IoStatus::Ok => {
                                scope.output("eof");
                                return Ok(Step::Return(ScriptValue::Bool(true)));
                            }
                            IoStatus::Error => return Ok(fail(scope, "recv")),
                        }
                    }
                    Echo::AwaitRecv => {
                        if let Some(data) = scope.take_received() {
                            scope.output(data);
                            return Ok(Step::Return(ScriptValue::Bool(true)));
                        }
                        match scope.recv_status() {
                            IoStatus::Again => return Ok(Step::Yield),
                            IoStatus::Ok => {
                                scope.output("eof");
                                return Ok(Step::Return(ScriptValue::Bool(true)));
                            }
                            IoStatus::Error => return Ok(fail(scope, "recv")),
                        }
                    }
                };
            }
        }))
    });
}

/// 连接后以 `recv_sync(limit)` 读取，完整数据一次性写到输出。
pub fn register_recv_sync(interp: &mut NativeInterpreter, key: &str, limit: RecvLimit) {
    interp.register_program(key, move |_, _| {
        let mut started = false;
        Ok(Invocation::coroutine(move |scope| {
            if !started {
                started = true;
                if !scope.connect("10.0.0.9:9000", 0).is_ok() {
                    return Ok(fail(scope, "connect"));
                }
                if scope.recv_sync(limit).is_again() {
                    return Ok(Step::Yield);
                }
            }
            match scope.recv_status() {
                IoStatus::Again => Ok(Step::Yield),
                IoStatus::Ok => {
                    if let Some(data) = scope.take_received() {
                        scope.output(data);
                    }
                    Ok(Step::Return(ScriptValue::Bool(true)))
                }
                IoStatus::Error => Ok(fail(scope, "recv_sync")),
            }
        }))
    });
}

/// 连接后以 `recv_wait` 读取，每收到一块就写到输出，直到读满 `total` 字节或流结束。
pub fn register_recv_wait(interp: &mut NativeInterpreter, key: &str, total: usize) {
    interp.register_program(key, move |_, _| {
        let mut started = false;
        let mut seen = 0usize;
        Ok(Invocation::coroutine(move |scope| {
            if !started {
                started = true;
                if !scope.connect("10.0.0.9:9000", 0).is_ok() {
                    return Ok(fail(scope, "connect"));
                }
                if scope.recv_wait().is_error() {
                    return Ok(fail(scope, "recv_wait"));
                }
            }
            if let Some(data) = scope.take_received() {
                seen += data.len();
                scope.output(data);
            }
            if seen >= total {
                return Ok(Step::Return(ScriptValue::Bool(true)));
            }
            match scope.recv_status() {
                IoStatus::Again => Ok(Step::Yield),
                IoStatus::Ok => Ok(Step::Return(ScriptValue::Bool(true))),
                IoStatus::Error => Ok(fail(scope, "recv_wait")),
            }
        }))
    });
}

/// 睡眠 `naps` 次后结束。
pub fn register_nap(interp: &mut NativeInterpreter, key: &str, naps: u32) {
    interp.register_program(key, move |_, _| {
        let mut taken = 0;
        Ok(Invocation::coroutine(move |scope| {
            if taken == naps {
                scope.output("awake");
                return Ok(Step::Return(ScriptValue::Null));
            }
            taken += 1;
            scope.sleep(Duration::from_millis(10));
            Ok(Step::Yield)
        }))
    });
}

/// 连接后立即关闭两次。
pub fn register_double_close(interp: &mut NativeInterpreter, key: &str) {
    interp.register_program(key, |_, scope| {
        if scope.connect("10.0.0.9:9000", 0).is_error() {
            scope.output("connect failed");
        }
        scope.close();
        scope.close();
        scope.output("closed");
        Ok(Invocation::value(true))
    });
}
