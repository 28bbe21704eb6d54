//! Deterministic [`ModelProvider`] for relay and route tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use super::{ChunkStream, GeneratedImage, ModelProvider, PromptMessage, ProviderError};

#[derive(Debug, Clone)]
pub enum Step {
    Chunk(String),
    Fail(ProviderError),
    /// Never yield again.
    Stall,
}

#[derive(Debug)]
pub struct ScriptedProvider {
    open_error: Option<ProviderError>,
    open_stall: bool,
    steps: Vec<Step>,
    chunk_delay: Option<Duration>,
    image: Result<GeneratedImage, ProviderError>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
    image_prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Streams `chunks` and then completes.
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            open_error: None,
            open_stall: false,
            steps: chunks.iter().map(|c| Step::Chunk((*c).to_owned())).collect(),
            chunk_delay: None,
            image: Ok(GeneratedImage {
                url: "https://img.example/generated.png".into(),
                revised_prompt: None,
            }),
            prompts: Mutex::new(Vec::new()),
            image_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Refuses to open the stream at all.
    pub fn failing_to_open(err: ProviderError) -> Self {
        Self {
            open_error: Some(err),
            ..Self::replying(&[])
        }
    }

    /// Accepts the request but never hands back a stream.
    pub fn stalling_on_open() -> Self {
        Self {
            open_stall: true,
            ..Self::replying(&[])
        }
    }

    pub fn then_fail(mut self, err: ProviderError) -> Self {
        self.steps.push(Step::Fail(err));
        self
    }

    pub fn then_stall(mut self) -> Self {
        self.steps.push(Step::Stall);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn with_image(mut self, image: Result<GeneratedImage, ProviderError>) -> Self {
        self.image = image;
        self
    }

    /// Every message list passed to `stream_chat`, in call order.
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream_chat(&self, messages: Vec<PromptMessage>) -> Result<ChunkStream, ProviderError> {
        self.prompts.lock().unwrap().push(messages);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        if self.open_stall {
            futures::future::pending::<()>().await;
        }

        let delay = self.chunk_delay;
        let steps = stream::iter(self.steps.clone()).then(move |step| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Chunk(text) => Ok(text),
                Step::Fail(err) => Err(err),
                Step::Stall => futures::future::pending().await,
            }
        });
        Ok(Box::pin(steps))
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        self.image_prompts.lock().unwrap().push(prompt.to_owned());
        self.image.clone()
    }
}
