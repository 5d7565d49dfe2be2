//! Ties command construction, PTY execution, and output filtering/
//! classification into a single `run` call (C4).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kml_core::error::Result;

use crate::command::{SessionFlag, build_command};
use crate::executor::PtyExecutor;
use crate::filter::LineFilter;
use crate::records::{OutputRecord, classify, classify_exit};

/// Overall wall-clock budget for one `claude -p ...` invocation.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct AiRunner<'a> {
    executor: &'a dyn PtyExecutor,
    anthropic_token: String,
    anthropic_base_url: Option<String>,
}

impl<'a> AiRunner<'a> {
    pub fn new(executor: &'a dyn PtyExecutor, anthropic_token: String, anthropic_base_url: Option<String>) -> Self {
        Self { executor, anthropic_token, anthropic_base_url }
    }

    /// Run one prompt to completion, invoking `on_record` for every
    /// structured record the assistant emits, in order. If the process
    /// exits with a non-zero code, a final [`OutputRecord::ProcessExited`]
    /// is emitted once the PTY closes.
    pub async fn run<F>(&self, prompt: &str, session_flag: SessionFlag, on_record: F) -> Result<()>
    where
        F: FnMut(OutputRecord) + Send + 'static,
    {
        let command = build_command(
            &self.anthropic_token,
            self.anthropic_base_url.as_deref(),
            &session_flag,
            prompt,
        );

        let filter = Arc::new(Mutex::new(LineFilter::new()));
        let on_record = Arc::new(Mutex::new(on_record));

        let mut on_chunk = {
            let filter = Arc::clone(&filter);
            let on_record = Arc::clone(&on_record);
            move |chunk: &[u8]| {
                let lines = filter.lock().unwrap().push(chunk);
                let mut on_record = on_record.lock().unwrap();
                for line in lines {
                    for record in classify(&line) {
                        on_record(record);
                    }
                }
            }
        };

        let exit_code = self.executor.run_pty(&command, RUN_TIMEOUT, &mut on_chunk).await?;
        if let Some(code) = exit_code {
            if code != 0 {
                on_record.lock().unwrap()(classify_exit(code));
            }
        }
        Ok(())
    }
}
