use futures::StreamExt;
use futures::future::LocalBoxFuture;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantError, AssistantService, EventStream, StreamEvent};
use crate::reply::{ReplyAccumulator, ReplySurface};
use crate::tools::ToolInvoker;

const TERMINAL_RUN_EVENTS: &[&str] = &[
    "thread.run.failed",
    "thread.run.expired",
    "thread.run.cancelled",
];

/// Drives one assistant run stream to completion.
///
/// Text fragments go into the shared [`ReplyAccumulator`]. When the run
/// pauses for tool calls, the outputs are submitted and the resumed stream
/// is drained by a nested dispatcher borrowing the same accumulator and
/// surface, after which the outer stream continues.
pub struct StreamDispatcher<'a> {
    service: &'a dyn AssistantService,
    invoker: &'a ToolInvoker,
    reply: &'a mut ReplyAccumulator,
    surface: &'a mut dyn ReplySurface,
}

impl<'a> StreamDispatcher<'a> {
    pub fn new(
        service: &'a dyn AssistantService,
        invoker: &'a ToolInvoker,
        reply: &'a mut ReplyAccumulator,
        surface: &'a mut dyn ReplySurface,
    ) -> Self {
        Self {
            service,
            invoker,
            reply,
            surface,
        }
    }

    pub fn drain(&mut self, mut stream: EventStream) -> LocalBoxFuture<'_, Result<(), AssistantError>> {
        Box::pin(async move {
            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::TextDelta(fragment) => {
                        self.reply.push(&fragment);
                        self.surface.render(self.reply.as_str());
                    }
                    StreamEvent::RequiresAction { run, calls } => {
                        if calls.is_empty() {
                            warn!(run=%run.id, "requires_action without tool calls; nothing submitted");
                            continue;
                        }
                        info!(run=%run.id, count = calls.len(), "run requires tool outputs");
                        let outputs = self.invoker.resolve_all(&calls).await;
                        let resumed = self
                            .service
                            .submit_tool_outputs_stream(&run, &outputs)
                            .await?;
                        let mut nested = StreamDispatcher {
                            service: self.service,
                            invoker: self.invoker,
                            reply: &mut *self.reply,
                            surface: &mut *self.surface,
                        };
                        nested.drain(resumed).await?;
                    }
                    StreamEvent::Other(name) => {
                        if TERMINAL_RUN_EVENTS.contains(&name.as_str()) {
                            warn!(event=%name, "run ended without completing");
                        } else {
                            debug!(event=%name, "ignoring stream event");
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::tools::unknown_tool_output;

    fn invoker() -> ToolInvoker {
        ToolInvoker::new().with_tool(FixedTool {
            name: "fuel_calculator",
            output: "take a gel",
        })
    }

    async fn run(
        service: &ScriptedService,
        invoker: &ToolInvoker,
        reply: &mut ReplyAccumulator,
        surface: &mut RecordingSurface,
    ) -> Result<(), AssistantError> {
        let stream = service.stream_run("thread_1", "asst_1").await?;
        StreamDispatcher::new(service, invoker, reply, surface)
            .drain(stream)
            .await
    }

    #[tokio::test]
    async fn renders_running_concatenation() {
        let service = ScriptedService::new(vec![vec![
            text("Hel"),
            Ok(StreamEvent::Other("thread.run.step.created".into())),
            text("lo, "),
            text("runner"),
        ]]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        run(&service, &invoker, &mut reply, &mut surface).await.unwrap();

        assert_eq!(reply.as_str(), "Hello, runner");
        assert_eq!(surface.frames, vec!["Hel", "Hello, ", "Hello, runner"]);
        assert!(service.submissions().is_empty());
    }

    #[tokio::test]
    async fn resumed_stream_appends_to_same_reply() {
        let service = ScriptedService::new(vec![
            vec![
                text("Let me check. "),
                requires_action("run_1", &[("call_1", "fuel_calculator")]),
                text(" Done."),
            ],
            vec![text("You should take a gel.")],
        ]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        run(&service, &invoker, &mut reply, &mut surface).await.unwrap();

        assert_eq!(reply.as_str(), "Let me check. You should take a gel. Done.");
        assert_eq!(surface.frames.last().unwrap(), reply.as_str());

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0.id, "run_1");
        assert_eq!(submissions[0].1[0].tool_call_id, "call_1");
        assert_eq!(submissions[0].1[0].output, "take a gel");
    }

    #[tokio::test]
    async fn every_call_in_batch_is_answered() {
        let service = ScriptedService::new(vec![
            vec![requires_action(
                "run_1",
                &[
                    ("call_a", "fuel_calculator"),
                    ("call_b", "weather"),
                    ("call_c", "fuel_calculator"),
                ],
            )],
            vec![text("ok")],
        ]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        run(&service, &invoker, &mut reply, &mut surface).await.unwrap();

        let submissions = service.submissions();
        assert_eq!(submissions.len(), 1);
        let outputs = &submissions[0].1;
        let ids: Vec<_> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b", "call_c"]);
        assert_eq!(outputs[1].output, unknown_tool_output("weather"));
    }

    #[tokio::test]
    async fn nested_resubmission_is_followed() {
        let service = ScriptedService::new(vec![
            vec![requires_action("run_1", &[("call_1", "fuel_calculator")])],
            vec![
                text("first "),
                requires_action("run_1", &[("call_2", "fuel_calculator")]),
            ],
            vec![text("second")],
        ]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        run(&service, &invoker, &mut reply, &mut surface).await.unwrap();

        assert_eq!(reply.as_str(), "first second");
        let ids: Vec<_> = service
            .submissions()
            .into_iter()
            .map(|(_, outputs)| outputs[0].tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[tokio::test]
    async fn empty_requires_action_submits_nothing() {
        let service = ScriptedService::new(vec![vec![
            requires_action("run_1", &[]),
            text("still here"),
        ]]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        run(&service, &invoker, &mut reply, &mut surface).await.unwrap();

        assert_eq!(reply.as_str(), "still here");
        assert!(service.submissions().is_empty());
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_text() {
        let service = ScriptedService::new(vec![vec![
            text("partial"),
            Err(AssistantError::StreamFailed("server_error".into())),
            text("never seen"),
        ]]);
        let invoker = invoker();
        let mut reply = ReplyAccumulator::new();
        let mut surface = RecordingSurface::default();

        let err = run(&service, &invoker, &mut reply, &mut surface)
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::StreamFailed(ref m) if m == "server_error"));
        assert_eq!(reply.as_str(), "partial");
    }
}
