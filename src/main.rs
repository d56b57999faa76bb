mod config;
mod conversation;
mod gateway;
mod registry;

use iced::{
    widget::{
        button, checkbox, column, container, row, scrollable, text, text_input, text_input::Id,
        Space,
    },
    Element, Length, Task, Theme, Font, Subscription,
    time,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment,
    window,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, Stream};
use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationError, ConversationLog, StreamingAnswer};
use crate::gateway::GatewayClient;
use crate::registry::DocumentRegistry;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn main() -> iced::Result {
    env_logger::init();

    let config = config::Config::load();

    iced::application("Document Q&A", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .default_font(Font::MONOSPACE)
        .run_with(App::new)
}

#[derive(Debug, Clone)]
enum Message {
    QuestionChanged(String),
    SubmitQuestion,
    Query(QueryEvent),
    StopQuery,
    ToggleDoc(String),
    ToggleSelectAll(bool),
    DeleteSelected,
    DocsDeleted(Result<(), String>),
    UploadPathChanged(String),
    Upload,
    Uploaded(Result<String, String>),
    DocsFetched(Result<Vec<String>, String>),
    Tick,
    Exit,
}

/// Progress of the in-flight query, delivered as a stream of messages.
#[derive(Debug, Clone)]
enum QueryEvent {
    Fragment(String),
    Finished,
    Failed(String),
    Stopped,
}

/// Single-flight query machine. `InFlight` covers both the "request sent,
/// nothing received" and the "streaming fragments" phases; the accumulator's
/// `awaiting_first_fragment` flag tells them apart.
enum QueryPhase {
    Idle,
    InFlight {
        answer: StreamingAnswer,
        cancel: CancellationToken,
    },
}

/// Everything a query needs, captured at submit time so the streaming task
/// owns its inputs outright.
struct QueryJob {
    docs: Vec<String>,
    question: String,
    history: String,
    cancel: CancellationToken,
}

struct App {
    gateway: Arc<GatewayClient>,
    registry: DocumentRegistry,
    conversation: ConversationLog,
    phase: QueryPhase,
    question_input: String,
    upload_path: String,
    notice: Option<String>,
    spinner_frame: usize,
    input_id: Id,
}

fn fetch_docs(gateway: Arc<GatewayClient>) -> Task<Message> {
    Task::future(async move {
        Message::DocsFetched(gateway.list_docs().await.map_err(|e| e.to_string()))
    })
}

async fn upload_from_path(gateway: Arc<GatewayClient>, path: String) -> anyhow::Result<String> {
    let path = PathBuf::from(path);
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("not a path to a file: {}", path.display()))?;
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    gateway.upload_file(&filename, bytes).await?;
    Ok(filename)
}

/// Drive one query against the backend, emitting an event per fragment and a
/// terminal event when the stream ends, fails, or is stopped.
fn answer_events(gateway: Arc<GatewayClient>, job: QueryJob) -> impl Stream<Item = QueryEvent> {
    iced::stream::channel(100, move |mut output| async move {
        let mut stream = match gateway.query(&job.docs, &job.question, &job.history).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = output.send(QueryEvent::Failed(e.to_string())).await;
                return;
            }
        };

        loop {
            let next = tokio::select! {
                _ = job.cancel.cancelled() => {
                    let _ = output.send(QueryEvent::Stopped).await;
                    return;
                }
                next = stream.next_fragment() => next,
            };

            match next {
                Ok(Some(fragment)) => {
                    let _ = output.send(QueryEvent::Fragment(fragment)).await;
                }
                Ok(None) => {
                    let _ = output.send(QueryEvent::Finished).await;
                    return;
                }
                Err(e) => {
                    let _ = output.send(QueryEvent::Failed(e.to_string())).await;
                    return;
                }
            }
        }
    })
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = config::Config::load();
        let gateway = Arc::new(GatewayClient::new(config.backend.host));
        let input_id = Id::unique();

        let app = App {
            gateway: gateway.clone(),
            registry: DocumentRegistry::new(),
            conversation: ConversationLog::new(),
            phase: QueryPhase::Idle,
            question_input: String::new(),
            upload_path: String::new(),
            notice: None,
            spinner_frame: 0,
            input_id: input_id.clone(),
        };

        let focus_task = text_input::focus(input_id);
        (app, Task::batch([focus_task, fetch_docs(gateway)]))
    }

    fn is_typing(&self) -> bool {
        matches!(&self.phase, QueryPhase::InFlight { answer, .. } if answer.awaiting_first_fragment())
    }

    /// Validate and stage a new exchange. Returns `None` (with a notice set)
    /// when the question is empty or another query is still in flight; in
    /// that case nothing is appended and no request goes out.
    fn prepare_query(&mut self) -> Option<QueryJob> {
        if !matches!(self.phase, QueryPhase::Idle) {
            self.notice =
                Some("Still answering. Wait for it to finish or press Stop.".to_string());
            return None;
        }

        let question = self.question_input.trim().to_string();
        match self.conversation.begin_exchange(&question) {
            Ok(_) => {}
            Err(ConversationError::EmptyQuestion) => {
                self.notice = Some("Type a question first.".to_string());
                return None;
            }
            Err(e) => {
                self.notice = Some(e.to_string());
                return None;
            }
        }

        let history = self.conversation.history_context();
        let cancel = CancellationToken::new();
        self.phase = QueryPhase::InFlight {
            answer: StreamingAnswer::new(),
            cancel: cancel.clone(),
        };
        self.question_input.clear();
        self.notice = None;

        Some(QueryJob {
            docs: self.registry.effective_scope(),
            question,
            history,
            cancel,
        })
    }

    fn apply_query_event(&mut self, event: QueryEvent) {
        match event {
            QueryEvent::Fragment(fragment) => {
                if let QueryPhase::InFlight { answer, .. } = &mut self.phase {
                    answer.push_fragment(&fragment);
                }
            }
            QueryEvent::Finished => {
                if let QueryPhase::InFlight { answer, .. } =
                    std::mem::replace(&mut self.phase, QueryPhase::Idle)
                {
                    if let Err(e) = self.conversation.resolve_last(answer.into_answer()) {
                        log::error!("conversation out of sync: {}", e);
                    }
                }
            }
            QueryEvent::Failed(reason) => {
                self.abort_query(&format!("(answer interrupted: {})", reason));
                self.notice = Some(format!("Query failed: {}", reason));
            }
            QueryEvent::Stopped => {
                self.abort_query("(stopped)");
                self.notice = Some("Query stopped.".to_string());
            }
        }
    }

    /// Return to `Idle` without a complete answer. Whatever partial text
    /// already streamed in becomes the answer; with no fragments at all the
    /// entry resolves to the placeholder instead.
    fn abort_query(&mut self, placeholder: &str) {
        if let QueryPhase::InFlight { answer, .. } =
            std::mem::replace(&mut self.phase, QueryPhase::Idle)
        {
            let resolved = if answer.awaiting_first_fragment() {
                placeholder.to_string()
            } else {
                answer.into_answer()
            };
            if let Err(e) = self.conversation.resolve_last(resolved) {
                log::error!("conversation out of sync: {}", e);
            }
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::QuestionChanged(value) => {
                self.question_input = value;
                Task::none()
            }
            Message::SubmitQuestion => match self.prepare_query() {
                Some(job) => {
                    let gateway = self.gateway.clone();
                    Task::run(answer_events(gateway, job), Message::Query)
                }
                None => Task::none(),
            },
            Message::Query(event) => {
                self.apply_query_event(event);
                Task::none()
            }
            Message::StopQuery => {
                if let QueryPhase::InFlight { cancel, .. } = &self.phase {
                    cancel.cancel();
                }
                Task::none()
            }
            Message::ToggleDoc(doc) => {
                self.registry.toggle(&doc);
                Task::none()
            }
            Message::ToggleSelectAll(checked) => {
                if checked {
                    self.registry.select_all();
                } else {
                    self.registry.clear_selection();
                }
                Task::none()
            }
            Message::DeleteSelected => {
                let docs = self.registry.selection();
                if docs.is_empty() {
                    self.notice = Some("Select at least one document to delete.".to_string());
                    return Task::none();
                }
                let gateway = self.gateway.clone();
                Task::future(async move {
                    Message::DocsDeleted(gateway.delete_docs(&docs).await.map_err(|e| e.to_string()))
                })
            }
            Message::DocsDeleted(Ok(())) => {
                self.registry.clear_selection();
                self.notice = Some("Deleted.".to_string());
                fetch_docs(self.gateway.clone())
            }
            Message::DocsDeleted(Err(e)) => {
                log::error!("delete failed: {}", e);
                self.notice = Some(format!("Failed to delete: {}", e));
                Task::none()
            }
            Message::UploadPathChanged(value) => {
                self.upload_path = value;
                Task::none()
            }
            Message::Upload => {
                let path = self.upload_path.trim().to_string();
                if path.is_empty() {
                    self.notice = Some("Enter the path of a file to upload.".to_string());
                    return Task::none();
                }
                let gateway = self.gateway.clone();
                Task::future(async move {
                    Message::Uploaded(
                        upload_from_path(gateway, path)
                            .await
                            .map_err(|e| format!("{:#}", e)),
                    )
                })
            }
            Message::Uploaded(Ok(filename)) => {
                self.upload_path.clear();
                self.notice = Some(format!("Uploaded {}.", filename));
                fetch_docs(self.gateway.clone())
            }
            Message::Uploaded(Err(e)) => {
                log::error!("upload failed: {}", e);
                self.notice = Some(format!("Upload failed: {}", e));
                Task::none()
            }
            Message::DocsFetched(Ok(docs)) => {
                self.registry.apply_refresh(docs);
                Task::none()
            }
            Message::DocsFetched(Err(e)) => {
                log::error!("list_docs failed: {}", e);
                self.notice = Some(format!("Failed to fetch documents: {}", e));
                Task::none()
            }
            Message::Tick => {
                if self.is_typing() {
                    self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
                }
                Task::none()
            }
            Message::Exit => iced::exit(),
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.is_typing() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view_sidebar(&self) -> Element<Message> {
        let upload_row = row![
            text_input("Path to a document...", &self.upload_path)
                .on_input(Message::UploadPathChanged)
                .on_submit(Message::Upload)
                .padding(8)
                .size(14),
            button(text("Upload").size(14))
                .on_press(Message::Upload)
                .padding(8),
        ]
        .spacing(8);

        let select_all = checkbox("Select all", self.registry.all_selected())
            .on_toggle(Message::ToggleSelectAll)
            .size(16)
            .text_size(14);

        let mut delete_button = button(text("Delete").size(14)).padding(8);
        if !self.registry.selection_is_empty() {
            delete_button = delete_button.on_press(Message::DeleteSelected);
        }

        let mut doc_list = column![].spacing(6);
        if self.registry.is_empty() {
            doc_list = doc_list.push(text("No documents uploaded yet.").size(14));
        } else {
            for doc in self.registry.docs() {
                let name = doc.clone();
                doc_list = doc_list.push(
                    checkbox(doc.clone(), self.registry.is_selected(doc))
                        .on_toggle(move |_| Message::ToggleDoc(name.clone()))
                        .size(16)
                        .text_size(14),
                );
            }
        }

        container(
            column![
                text("Documents").size(18),
                upload_row,
                row![select_all, Space::with_width(Length::Fill), delete_button]
                    .align_y(alignment::Vertical::Center),
                scrollable(doc_list).height(Length::Fill),
            ]
            .spacing(12)
            .padding(10),
        )
        .width(320)
        .height(Length::Fill)
        .into()
    }

    fn view_conversation(&self) -> Element<Message> {
        if self.conversation.is_empty() {
            return container(
                text("Upload documents on the left, then ask about them.").size(15),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into();
        }

        let mut chat = column![].spacing(6);
        for exchange in self.conversation.exchanges() {
            chat = chat.push(text(format!("You: {}", exchange.question)).size(15));

            let answer: Element<Message> = match &exchange.answer {
                Some(answer) => text(answer.clone()).size(15).into(),
                None => match &self.phase {
                    QueryPhase::InFlight { answer, .. } if !answer.awaiting_first_fragment() => {
                        text(answer.partial().to_string()).size(15).into()
                    }
                    _ => text(SPINNER_FRAMES[self.spinner_frame]).size(15).into(),
                },
            };
            chat = chat.push(answer);
            chat = chat.push(Space::with_height(10));
        }

        scrollable(container(chat).padding(15).width(Length::Fill))
            .height(Length::Fill)
            .anchor_bottom()
            .into()
    }

    fn view(&self) -> Element<Message> {
        let ask_input = text_input("Ask a question...", &self.question_input)
            .on_input(Message::QuestionChanged)
            .on_submit(Message::SubmitQuestion)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());

        let action: Element<Message> = if matches!(self.phase, QueryPhase::InFlight { .. }) {
            button(text("Stop").size(14))
                .on_press(Message::StopQuery)
                .padding(12)
                .into()
        } else {
            button(text("Ask").size(14))
                .on_press(Message::SubmitQuestion)
                .padding(12)
                .into()
        };

        let mut main_pane = column![
            self.view_conversation(),
            row![ask_input, action].spacing(8),
        ]
        .spacing(10)
        .padding(10)
        .width(Length::Fill);

        if let Some(notice) = &self.notice {
            main_pane = main_pane.push(text(notice.clone()).size(13));
        }

        row![self.view_sidebar(), main_pane]
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
