//! Rendering seam between the workflow and whatever draws it

use super::Step;
use crate::wallet::send::TxSummary;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Waiting(String),
    Done,
    Failed(String),
}

/// Yes/no gates the workflow cannot pass on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    DeviceReady,
    RunRoundTrip,
    Broadcast(TxSummary),
}

impl Question {
    pub fn kind(&self) -> QuestionKind {
        match self {
            Question::DeviceReady => QuestionKind::DeviceReady,
            Question::RunRoundTrip => QuestionKind::RunRoundTrip,
            Question::Broadcast(_) => QuestionKind::Broadcast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionKind {
    DeviceReady,
    RunRoundTrip,
    Broadcast,
}

pub trait StepReporter: Send {
    fn render(&mut self, step: Step, status: &StepStatus);

    /// `None` means no answer yet; the step stays pending and is asked again
    fn confirm(&mut self, question: &Question) -> Option<bool>;
}

/// Answers from a fixed table and records every render
#[derive(Debug, Default)]
pub struct RecordingReporter {
    answers: HashMap<QuestionKind, bool>,
    pub rendered: Vec<(Step, StepStatus)>,
    pub asked: Vec<QuestionKind>,
}

impl RecordingReporter {
    pub fn new() -> Self { Self::default() }

    pub fn answer(mut self, kind: QuestionKind, yes: bool) -> Self {
        self.answers.insert(kind, yes);
        self
    }

    pub fn set_answer(&mut self, kind: QuestionKind, yes: Option<bool>) {
        match yes {
            Some(yes) => self.answers.insert(kind, yes),
            None => self.answers.remove(&kind),
        };
    }

    /// Steps that reached `Done`, in order
    pub fn completed(&self) -> Vec<Step> {
        self.rendered.iter().filter(|(_, s)| *s == StepStatus::Done).map(|(step, _)| *step).collect()
    }
}

impl StepReporter for RecordingReporter {
    fn render(&mut self, step: Step, status: &StepStatus) {
        self.rendered.push((step, status.clone()));
    }

    fn confirm(&mut self, question: &Question) -> Option<bool> {
        self.asked.push(question.kind());
        self.answers.get(&question.kind()).copied()
    }
}
