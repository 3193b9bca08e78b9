use std::collections::VecDeque;

use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::FrameSource;

/// One scripted read.
#[derive(Clone, Debug)]
pub enum ScriptedRead {
    Frame(Frame),
    Fail(String),
    EndOfStream,
}

/// Frame source that replays a fixed sequence of reads, for driving sessions
/// without a camera. Reads past the end of the script report end of stream.
pub struct ScriptedSource {
    url: String,
    script: VecDeque<ScriptedRead>,
    fail_open: bool,
    is_open: bool,
    opens: u32,
}

impl ScriptedSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            script: VecDeque::new(),
            fail_open: false,
            is_open: false,
            opens: 0,
        }
    }

    pub fn then_frame(mut self, frame: Frame) -> Self {
        self.script.push_back(ScriptedRead::Frame(frame));
        self
    }

    pub fn then_frames(mut self, count: usize, frame: &Frame) -> Self {
        for _ in 0..count {
            self.script.push_back(ScriptedRead::Frame(frame.clone()));
        }
        self
    }

    pub fn then_failures(mut self, count: usize) -> Self {
        for n in 0..count {
            self.script
                .push_back(ScriptedRead::Fail(format!("scripted failure {}", n + 1)));
        }
        self
    }

    /// Make every `open` call fail.
    pub fn unreachable(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> u32 {
        self.opens
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            return Err(SourceError::Open {
                url: self.url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.is_open = true;
        self.opens += 1;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.is_open {
            return Err(SourceError::NotOpen);
        }
        match self.script.pop_front() {
            Some(ScriptedRead::Frame(frame)) => Ok(Some(frame)),
            Some(ScriptedRead::Fail(reason)) => Err(SourceError::Read(reason)),
            Some(ScriptedRead::EndOfStream) | None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.is_open = false;
    }
}
