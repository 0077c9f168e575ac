use std::time::Instant;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::inference::qa_pipeline::{Prediction, QaPipeline};

/// A question and the passage it should be answered from.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub context: String,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct AnswerResponse {
    pub prediction: Prediction,
    pub inference_time: f64,
}

pub trait AnswerHandler {
    fn run_answer(&self, request: AnswerRequest) -> Result<AnswerResponse, Error>;
}

impl AnswerHandler for QaPipeline {
    #[tracing::instrument(level = "info", skip(self, request))]
    fn run_answer(&self, request: AnswerRequest) -> Result<AnswerResponse, Error> {
        if request.question.trim().is_empty() {
            bail!("Question must not be empty");
        }

        let start = Instant::now();
        let prediction = self.predict(&request.question, &request.context)?;
        let inference_time = start.elapsed().as_secs_f64();

        let (start_index, end_index) = prediction.indices();
        info!(
            monotonic_counter.qa_answers = 1_u64,
            histogram.qa_inference_seconds = inference_time,
            start_index,
            end_index,
            answered = matches!(prediction, Prediction::Answer(_)),
            "answered in {:.3}s",
            inference_time
        );

        Ok(AnswerResponse {
            prediction,
            inference_time,
        })
    }
}
