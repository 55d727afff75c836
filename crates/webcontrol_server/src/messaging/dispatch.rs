//! Command dispatch: the boundary between the network core and the host.
//!
//! Everything in this module runs on the host's tick thread. The host plugs in
//! its facilities through [`CommandDispatcher`]; [`dispatch`] maps a task onto
//! those facilities and guarantees a well-formed result no matter how the
//! host behaves.

use super::types::{Command, Reply, ScriptArg, Task, TaskBody, TaskResult};
use crate::error::DispatchError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Host facilities invoked for client commands.
///
/// Implementations are only ever called from [`Server::tick`](crate::Server::tick),
/// so they may touch state that is unsafe to use from the I/O threads.
/// Neither `Send` nor `Sync` is required.
pub trait CommandDispatcher {
    /// Display names of every currently known entity.
    fn player_names(&self) -> Result<Vec<String>, DispatchError>;

    /// Compiles and runs `script`, returning its stringified value.
    fn execute_script(&self, script: &str) -> Result<String, DispatchError>;

    /// Calls the function registered as `name` with `args`, returning its
    /// stringified value.
    fn call_function(&self, name: &str, args: &[ScriptArg]) -> Result<String, DispatchError>;
}

/// Runs one task through the dispatcher.
///
/// Dispatcher errors and panics both become an error result carrying the
/// task's `watch` token. Unknown command types yield an empty result.
pub fn dispatch(dispatcher: &dyn CommandDispatcher, task: &Task) -> TaskResult {
    let command = match &task.body {
        TaskBody::Command(command) => command,
        TaskBody::Malformed(reason) => {
            debug!("Rejecting malformed task: {}", reason);
            return TaskResult::error(reason.clone(), task.watch.clone(), task.mode);
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| run_command(dispatcher, command, task)));

    match outcome {
        Ok(Ok(reply)) => TaskResult {
            reply,
            mode: task.mode,
        },
        Ok(Err(e)) => {
            debug!("Dispatcher returned an error: {}", e);
            TaskResult::error(e.to_string(), task.watch.clone(), task.mode)
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            warn!("Dispatcher panicked: {}", message);
            TaskResult::error(
                format!("dispatcher panicked: {message}"),
                task.watch.clone(),
                task.mode,
            )
        }
    }
}

fn run_command(
    dispatcher: &dyn CommandDispatcher,
    command: &Command,
    task: &Task,
) -> Result<Option<Reply>, DispatchError> {
    match command {
        Command::GetPlayerList => Ok(Some(Reply::PlayerList {
            players: dispatcher.player_names()?,
        })),
        Command::Exec { script } => Ok(Some(Reply::ExecRet {
            res: dispatcher.execute_script(script)?,
            watch: task.watch.clone(),
        })),
        Command::ExecFunc { fnc, args } => {
            let args = ScriptArg::collect(args);
            Ok(Some(Reply::ExecRet {
                res: dispatcher.call_function(fnc, &args)?,
                watch: task.watch.clone(),
            }))
        }
        Command::Unknown => Ok(None),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::types::FramingMode;
    use serde_json::json;
    use std::cell::RefCell;

    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl CommandDispatcher for Recorder {
        fn player_names(&self) -> Result<Vec<String>, DispatchError> {
            Ok(vec!["Alpha".to_string(), "Bravo".to_string()])
        }

        fn execute_script(&self, script: &str) -> Result<String, DispatchError> {
            self.calls.borrow_mut().push(script.to_string());
            match script {
                "1+1" => Ok("2".to_string()),
                "boom" => panic!("script engine crashed"),
                other => Err(DispatchError::Script(format!("cannot compile '{other}'"))),
            }
        }

        fn call_function(&self, name: &str, args: &[ScriptArg]) -> Result<String, DispatchError> {
            match name {
                "count" => Ok(args.len().to_string()),
                _ => Err(DispatchError::UnknownFunction(name.to_string())),
            }
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            calls: RefCell::new(Vec::new()),
        }
    }

    fn task(document: serde_json::Value) -> Task {
        Task::from_document(document, FramingMode::Text)
    }

    #[test]
    fn test_exec_echoes_watch() {
        let result = dispatch(
            &recorder(),
            &task(json!({"type": "Exec", "script": "1+1", "watch": "abc"})),
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "ExecRet", "res": "2", "watch": "abc"})
        );
    }

    #[test]
    fn test_exec_without_watch_omits_field() {
        let result = dispatch(&recorder(), &task(json!({"type": "Exec", "script": "1+1"})));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "ExecRet", "res": "2"})
        );
    }

    #[test]
    fn test_exec_func_skips_untyped_args() {
        let result = dispatch(
            &recorder(),
            &task(json!({
                "type": "ExecFunc",
                "fnc": "count",
                "args": [1, "two", true, {"code": "x"}, null],
                "watch": {"id": 9}
            })),
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "ExecRet", "res": "4", "watch": {"id": 9}})
        );
    }

    #[test]
    fn test_player_list_is_idempotent() {
        let dispatcher = recorder();
        let first = dispatch(&dispatcher, &task(json!({"type": "getPlayerlist"})));
        let second = dispatch(&dispatcher, &task(json!({"type": "getPlayerlist"})));
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            r#"{"type":"playerlist","players":["Alpha","Bravo"]}"#
        );
    }

    #[test]
    fn test_unknown_type_yields_empty_result() {
        let result = dispatch(&recorder(), &task(json!({"type": "noSuchThing", "watch": 1})));
        assert!(result.reply.is_none());
        assert_eq!(serde_json::to_string(&result).unwrap(), "{}");
    }

    #[test]
    fn test_dispatcher_errors_become_results() {
        let result = dispatch(
            &recorder(),
            &task(json!({"type": "ExecFunc", "fnc": "missing", "args": [], "watch": "w"})),
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"type": "Error", "error": "unknown function 'missing'", "watch": "w"})
        );
    }

    #[test]
    fn test_dispatcher_panic_is_contained() {
        let dispatcher = recorder();
        let result = dispatch(&dispatcher, &task(json!({"type": "Exec", "script": "boom"})));
        match result.reply {
            Some(Reply::Error { error, .. }) => assert!(error.contains("script engine crashed")),
            other => panic!("expected error reply, got {other:?}"),
        }

        // Still usable afterwards
        let result = dispatch(&dispatcher, &task(json!({"type": "Exec", "script": "1+1"})));
        assert!(matches!(result.reply, Some(Reply::ExecRet { .. })));
        assert_eq!(dispatcher.calls.borrow().len(), 2);
    }

    #[test]
    fn test_malformed_task_never_reaches_dispatcher() {
        let dispatcher = recorder();
        let result = dispatch(
            &dispatcher,
            &Task::malformed("invalid JSON", FramingMode::Binary),
        );
        assert_eq!(result.mode, FramingMode::Binary);
        assert!(matches!(result.reply, Some(Reply::Error { .. })));
        assert!(dispatcher.calls.borrow().is_empty());
    }
}
