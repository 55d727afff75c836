//! Sandbox host: a stand-in game that answers console commands.
//!
//! The sandbox keeps a fixed roster of player names and runs scripts through
//! a small expression evaluator, so the web console can be exercised end to
//! end without a real game attached.

mod eval;

use eval::{evaluate, EvalError, Functions, Value};

use tracing::debug;
use webcontrol_server::{CommandDispatcher, DispatchError, ScriptArg};

/// Host state the sandbox exposes to remote clients.
#[derive(Debug, Clone, Default)]
pub struct SandboxHost {
    players: Vec<String>,
}

impl SandboxHost {
    pub fn new(players: Vec<String>) -> Self {
        Self { players }
    }

    fn argument(&self, arg: &ScriptArg) -> Result<Value, EvalError> {
        match arg {
            ScriptArg::Number(n) => Ok(Value::Number(*n)),
            ScriptArg::Text(s) => Ok(Value::Text(s.clone())),
            ScriptArg::Bool(b) => Ok(Value::Bool(*b)),
            ScriptArg::Code(code) => evaluate(code, self),
        }
    }
}

impl Functions for SandboxHost {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name {
            "sum" => args
                .into_iter()
                .try_fold(0.0, |total, value| match value {
                    Value::Number(n) => Ok(total + n),
                    other => Err(EvalError::Type(format!("sum() expects numbers, got '{other}'"))),
                })
                .map(Value::Number),
            "concat" => Ok(Value::Text(args.iter().map(Value::to_string).collect())),
            "len" => match args.as_slice() {
                [Value::Text(s)] => Ok(Value::Number(s.chars().count() as f64)),
                _ => Err(EvalError::Type("len() expects one string".to_string())),
            },
            "player_count" => Ok(Value::Number(self.players.len() as f64)),
            "player" => match args.as_slice() {
                [Value::Number(n)] if n.fract() == 0.0 && *n >= 0.0 => self
                    .players
                    .get(*n as usize)
                    .map(|name| Value::Text(name.clone()))
                    .ok_or_else(|| EvalError::Type(format!("no player at index {n}"))),
                _ => Err(EvalError::Type("player() expects one index".to_string())),
            },
            "echo" => match <[Value; 1]>::try_from(args) {
                Ok([value]) => Ok(value),
                Err(_) => Err(EvalError::Type("echo() expects one argument".to_string())),
            },
            _ => Err(EvalError::UnknownFunction(name.to_string())),
        }
    }
}

impl From<EvalError> for DispatchError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::UnknownFunction(name) => DispatchError::UnknownFunction(name),
            other => DispatchError::Script(other.to_string()),
        }
    }
}

impl CommandDispatcher for SandboxHost {
    fn player_names(&self) -> Result<Vec<String>, DispatchError> {
        Ok(self.players.clone())
    }

    fn execute_script(&self, script: &str) -> Result<String, DispatchError> {
        debug!("Executing script: {}", script);
        Ok(evaluate(script, self)?.to_string())
    }

    fn call_function(&self, name: &str, args: &[ScriptArg]) -> Result<String, DispatchError> {
        debug!("Calling {}() with {} argument(s)", name, args.len());
        let args = args
            .iter()
            .map(|arg| self.argument(arg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.call(name, args)?.to_string())
    }
}
