//! # Async Generators
//!
//! A generator body runs as its own task and hands values back through a
//! `Co`. Calling the exported function returns a generator object with
//! `next(x)` and `return(v)` methods, each producing a `{value, done}` map.
//!
//! The body starts on the first `next`. `yield_` suspends it until the
//! following `next(x)` and evaluates to `x`. Once the body returns, throws
//! or is stopped by `return`, every further `next` yields
//! `{value: null, done: true}`.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use isowire::CallResult;
use isowire::Exception;
use isowire::Function;
use isowire::Object;
use isowire::Prototype;
use isowire::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Body = dyn Fn(Vec<Value>, Co) -> BoxFuture<'static, Result<Value, Exception>> + Send + Sync;

#[derive(Clone)]
pub struct AsyncGenerator {
    name: Arc<str>,
    body: Arc<Body>,
}

impl AsyncGenerator {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Value>, Co) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Exception>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |args, co| body(args, co).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The callable that creates a fresh generator object per call.
    pub fn to_function(&self) -> Function {
        let body = self.body.clone();
        Function::sync(self.name.to_string(), move |_, args| {
            Ok(Value::Object(instantiate(body.clone(), args)))
        })
    }
}

impl std::fmt::Debug for AsyncGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AsyncGenerator({})", self.name)
    }
}

enum Step {
    Yield(Value),
    Return(Value),
    Throw(Exception),
}

/// The body's side of a running generator.
pub struct Co {
    steps: mpsc::Sender<Step>,
    resume: mpsc::Receiver<Value>,
}

impl Co {
    /// Hands `value` to the consumer and waits for the next `next(x)`.
    pub async fn yield_(&mut self, value: impl Into<Value>) -> Value {
        // A closed channel means the generator is gone and this task is
        // about to be aborted.
        if self.steps.send(Step::Yield(value.into())).await.is_err() {
            return futures::future::pending().await;
        }
        match self.resume.recv().await {
            Some(value) => value,
            None => futures::future::pending().await,
        }
    }
}

enum State {
    Idle { body: Arc<Body>, args: Vec<Value> },
    Running(Running),
    Done,
}

struct Running {
    steps: mpsc::Receiver<Step>,
    resume: mpsc::Sender<Value>,
    task: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn step(value: Value, done: bool) -> Value {
    Value::map([("value", value), ("done", Value::Bool(done))])
}

fn instantiate(body: Arc<Body>, args: Vec<Value>) -> Object {
    let state = Arc::new(tokio::sync::Mutex::new(State::Idle { body, args }));

    let next_method = {
        let state = state.clone();
        Function::new("next", move |_, args| {
            let state = state.clone();
            async move { advance(&state, args.into_iter().next().unwrap_or(Value::Null)).await }
        })
    };
    let return_method = Function::new("return", move |_, args| {
        let state = state.clone();
        async move {
            *state.lock().await = State::Done;
            Ok(step(args.into_iter().next().unwrap_or(Value::Null), true))
        }
    });

    Object::with_prototype(Prototype::builder().method(next_method).method(return_method).build())
}

async fn advance(state: &tokio::sync::Mutex<State>, input: Value) -> CallResult {
    let mut state = state.lock().await;

    match std::mem::replace(&mut *state, State::Done) {
        State::Done => return Ok(step(Value::Null, true)),
        State::Idle { body, args } => {
            // The argument of the first `next` has no `yield_` to receive it.
            let (step_tx, steps) = mpsc::channel(1);
            let (resume, resume_rx) = mpsc::channel(1);
            let co = Co {
                steps: step_tx.clone(),
                resume: resume_rx,
            };
            let task = tokio::spawn(async move {
                let last = match body(args, co).await {
                    Ok(value) => Step::Return(value),
                    Err(e) => Step::Throw(e),
                };
                let _ = step_tx.send(last).await;
            });
            *state = State::Running(Running { steps, resume, task });
        }
        State::Running(running) => {
            let sent = running.resume.send(input).await;
            if sent.is_err() {
                return Err(Exception::new("generator body is no longer running"));
            }
            *state = State::Running(running);
        }
    }

    let State::Running(running) = &mut *state else {
        return Ok(step(Value::Null, true));
    };
    let received = running.steps.recv().await;
    match received {
        Some(Step::Yield(value)) => Ok(step(value, false)),
        Some(Step::Return(value)) => {
            *state = State::Done;
            Ok(step(value, true))
        }
        Some(Step::Throw(e)) => {
            *state = State::Done;
            Err(e)
        }
        None => {
            *state = State::Done;
            Err(Exception::new("generator body terminated abnormally"))
        }
    }
}
