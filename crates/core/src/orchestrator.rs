use std::sync::Arc;

use tracing::{info, warn};

use crate::analysis::AnalysisRecord;
use crate::error::CoreError;
use crate::provider::{AiProvider, ChatMessage, ImageSource};
use crate::session::{Role, Session, SessionIdentity, SessionPhase, SessionStore, Turn};

/// System instruction for voice-turn replies: short, warm, emotionally
/// supportive, and no critique of the artwork.
const VOICE_SYSTEM_PROMPT: &str = "당신은 아이들과 대화하는 친근한 AI 선생님입니다.\n\
아이의 이야기에 대해 짧고 긍정적인 정서적 피드백만 제공하세요.\n\
그림에 대한 구체적인 제안이나 수정사항은 언급하지 말고,\n\
아이의 감정과 생각을 지지하고 격려하는 답변만 해주세요.\n\
답변은 1-2문장으로 매우 짧게 해주세요.";

/// Fallback assistant reply when a voice-turn step fails.
pub const APOLOGY_TEXT: &str = "죄송해요, 잘 이해하지 못했어요. 다시 한 번 말씀해 주시겠어요?";

/// Vision instruction requesting colors, emotion, content, and context, in
/// that order, as free text. The reply is parsed by `AnalysisRecord::parse`.
const VISION_INSTRUCTION: &str = "이 그림을 분석해주세요. 다음 정보가 필요합니다:\n\
1. 사용된 주요 색상들\n\
2. 그림에서 느껴지는 감정\n\
3. 그림의 주요 내용\n\
4. 대화를 이어가기 위한 문맥 정보";

const FEEDBACK_SYSTEM_PROMPT: &str = "당신은 아이들의 그림을 보고 따뜻한 정서적 피드백을 \
제공하는 AI 선생님입니다. 아이의 감정을 이해하고, 그림을 더 발전시킬 수 있도록 격려하는 \
메시지를 2-3문장으로 생성해주세요.";

const SUMMARY_SYSTEM_PROMPT: &str = "당신은 아이와 AI 선생님의 대화를 정리하는 도우미입니다. \
아이가 어떤 이야기를 했고 어떤 그림을 그렸는지 2-3문장으로 따뜻하게 요약해주세요.";

const TITLE_SYSTEM_PROMPT: &str = "당신은 아이의 그림에 어울리는 제목을 짓는 도우미입니다. \
그림 분석과 대화 요약을 참고하여 짧고 예쁜 한국어 제목 하나만 답해주세요. \
따옴표나 설명 없이 제목만 출력하세요.";

const BACKGROUND_SYSTEM_PROMPT: &str = "당신은 아이의 그림과 대화를 바탕으로 배경 이미지를 \
만드는 일러스트 프롬프트 작가입니다. 그림 분석과 대화 요약을 참고하여, 아이의 그림과 \
어울리는 부드럽고 동화적인 배경 이미지를 묘사하는 영어 프롬프트를 한 단락으로 작성해주세요.";

/// Age-conditioned greeting; a missing age falls back to the generic filler,
/// never a numeric placeholder.
fn greeting_text(name: &str, age: Option<u8>) -> String {
    let age_text = match age {
        Some(age) => format!("{age}살"),
        None => "어린".to_string(),
    };
    format!(
        "안녕!, 귀여운 {age_text} 나이의 {name} 친구야!!\n\
         만나서 너무 반가워!!\n\
         오늘 우리 함께 재미있는 그림을 그려볼까요?\n\
         어떤 멋진 그림을 그리고 싶은지 이야기해주세요!"
    )
}

fn error_text(err: &CoreError) -> String {
    format!("error: {err}")
}

#[derive(Debug, Clone)]
pub struct NewSessionRequest {
    pub robot_id: String,
    pub name: String,
    pub age: Option<u8>,
    pub canvas_id: String,
}

/// Spoken greeting produced by a new-session event.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub text: String,
    pub audio: Vec<u8>,
}

/// Outcome of one voice turn. `user_text` is absent when transcription
/// itself failed and the apology fallback took over.
#[derive(Debug, Clone)]
pub struct VoiceReply {
    pub user_text: Option<String>,
    pub text: String,
    pub audio: Vec<u8>,
}

/// A synthesized assistant message (emotional feedback or closing words).
#[derive(Debug, Clone)]
pub struct SpokenMessage {
    pub text: String,
    pub audio: Vec<u8>,
}

/// Outcome of one image turn. The analysis is always stored; the spoken
/// feedback stage is best-effort.
#[derive(Debug, Clone)]
pub struct ImageTurn {
    pub analysis: AnalysisRecord,
    pub feedback: Option<SpokenMessage>,
}

/// Terminal results of the completion turn. Fields of failed steps carry an
/// `error: <message>` string; `closing` is present only when every step
/// succeeded.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub analysis: String,
    pub summary: String,
    pub title: String,
    pub background_image: String,
    pub conversation_history: Vec<String>,
    pub closing: Option<SpokenMessage>,
}

/// Per-session turn orchestrator. Owns the sequencing of AI capability calls
/// for each event type and mutates session state only through the store, so
/// concurrent voice and image turns on one session interleave whole appends.
pub struct Orchestrator<P> {
    store: Arc<SessionStore>,
    provider: P,
}

impl<P: AiProvider + Send + Sync> Orchestrator<P> {
    pub fn new(store: Arc<SessionStore>, provider: P) -> Self {
        Self { store, provider }
    }

    /// `Created -> Greeted`. Validates identity fields, builds the
    /// age-conditioned greeting, appends it as an assistant turn and
    /// synthesizes it. Validation runs before the store is touched, so a
    /// rejected request leaves no session behind.
    pub async fn handle_new_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<Greeting, CoreError> {
        if request.robot_id.trim().is_empty()
            || request.name.trim().is_empty()
            || request.canvas_id.trim().is_empty()
        {
            return Err(CoreError::Validation(
                "robot_id, name and canvas_id must all be present".to_string(),
            ));
        }

        info!(canvas_id = %request.canvas_id, "starting new drawing session");
        let text = greeting_text(&request.name, request.age);

        self.store.create(
            &request.canvas_id,
            SessionIdentity {
                robot_id: request.robot_id,
                name: request.name,
                age: request.age,
            },
        );
        self.store.mutate(&request.canvas_id, |session| {
            session.prompt = text.clone();
            session.push_turn(Role::Assistant, text.clone());
        })?;

        let audio = self.provider.synthesize(&text).await?;
        self.store.mutate(&request.canvas_id, |session| {
            session.audio = audio.clone();
            session.phase = SessionPhase::Greeted;
        })?;

        Ok(Greeting { text, audio })
    }

    /// `Greeted|InConversation -> InConversation`. Transcribes, appends the
    /// user turn, generates and appends the assistant reply, synthesizes it.
    ///
    /// Any capability failure in that sequence substitutes the fixed apology
    /// as the assistant turn and returns it. If synthesizing the apology
    /// itself fails, the error is fatal and propagates so the connection can
    /// close an unrecoverable session.
    pub async fn process_voice_turn(
        &self,
        canvas_id: &str,
        audio: &[u8],
    ) -> Result<VoiceReply, CoreError> {
        if self.store.get(canvas_id).is_none() {
            return Err(CoreError::SessionNotFound(canvas_id.to_string()));
        }
        info!(canvas_id, bytes = audio.len(), "processing voice turn");

        let mut transcript = None;
        let attempt = async {
            let user_text = self.provider.transcribe(audio).await?;
            self.store.mutate(canvas_id, |session| {
                session.push_turn(Role::User, user_text.clone());
                session.phase = SessionPhase::InConversation;
            })?;
            transcript = Some(user_text.clone());

            let messages = [
                ChatMessage::system(VOICE_SYSTEM_PROMPT),
                ChatMessage::user(user_text.clone()),
            ];
            let reply_text = self.provider.complete(&messages).await?;
            self.store.mutate(canvas_id, |session| {
                session.push_turn(Role::Assistant, reply_text.clone());
            })?;

            let reply_audio = self.provider.synthesize(&reply_text).await?;
            self.store
                .mutate(canvas_id, |session| session.audio = reply_audio.clone())?;

            Ok::<VoiceReply, CoreError>(VoiceReply {
                user_text: Some(user_text),
                text: reply_text,
                audio: reply_audio,
            })
        };

        let outcome = attempt.await;
        match outcome {
            Ok(reply) => Ok(reply),
            Err(err) => {
                warn!(canvas_id, error = %err, "voice turn failed, falling back to apology");
                self.store.mutate(canvas_id, |session| {
                    session.push_turn(Role::Assistant, APOLOGY_TEXT);
                })?;
                let apology_audio = self.provider.synthesize(APOLOGY_TEXT).await?;
                self.store
                    .mutate(canvas_id, |session| session.audio = apology_audio.clone())?;
                Ok(VoiceReply {
                    user_text: transcript,
                    text: APOLOGY_TEXT.to_string(),
                    audio: apology_audio,
                })
            }
        }
    }

    /// `InConversation -> InConversation`. Analyzes the image, stores the
    /// parsed record and the image reference, then runs the best-effort
    /// emotional-feedback stage. A feedback failure is logged and leaves the
    /// stored analysis intact.
    pub async fn process_image_turn(
        &self,
        canvas_id: &str,
        image: ImageSource,
    ) -> Result<ImageTurn, CoreError> {
        let session = self
            .store
            .get(canvas_id)
            .ok_or_else(|| CoreError::SessionNotFound(canvas_id.to_string()))?;
        info!(canvas_id, "processing image turn");

        let raw = self
            .provider
            .analyze_image(VISION_INSTRUCTION, &image)
            .await?;
        let analysis = AnalysisRecord::parse(&raw);
        self.store.mutate(canvas_id, |session| {
            session.image_url = Some(image.to_request_url());
            session.analyses.push(analysis.clone());
            session.phase = SessionPhase::InConversation;
        })?;

        let feedback = match self.image_feedback(&session, &analysis).await {
            Ok(feedback) => Some(feedback),
            Err(err) => {
                warn!(canvas_id, error = %err, "emotional feedback stage failed");
                None
            }
        };

        Ok(ImageTurn { analysis, feedback })
    }

    async fn image_feedback(
        &self,
        session: &Session,
        analysis: &AnalysisRecord,
    ) -> Result<SpokenMessage, CoreError> {
        let age_text = match session.age {
            Some(age) => age.to_string(),
            None => "미상".to_string(),
        };
        let messages = [
            ChatMessage::system(FEEDBACK_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "아이의 이름: {}\n나이: {}\n분석 결과:\n- 색상: {}\n- 감정: {}\n- 내용: {}\n- 문맥: {}",
                session.name,
                age_text,
                analysis.colors.join(", "),
                analysis.emotion,
                analysis.content,
                analysis.context,
            )),
        ];
        let text = self.provider.complete(&messages).await?;
        self.store.mutate(&session.canvas_id, |session| {
            session.push_turn(Role::Assistant, text.clone());
        })?;

        let audio = self.provider.synthesize(&text).await?;
        self.store
            .mutate(&session.canvas_id, |session| session.audio = audio.clone())?;

        Ok(SpokenMessage { text, audio })
    }

    /// `InConversation -> Completed`, terminal. Runs the four dependent
    /// steps in fixed order; each failure is caught locally, recorded as an
    /// `error: <message>` string in its field, and does not abort the
    /// remaining steps, so partial results may persist. The closing spoken
    /// message is produced only when all four steps succeed.
    pub async fn complete_session(
        &self,
        canvas_id: &str,
        image_url: &str,
    ) -> Result<CompletionReport, CoreError> {
        let session = self
            .store
            .get(canvas_id)
            .ok_or_else(|| CoreError::SessionNotFound(canvas_id.to_string()))?;
        info!(canvas_id, image_url, "completing drawing session");

        let summary = match self.summarize(&session).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(canvas_id, error = %err, "conversation summary failed");
                error_text(&err)
            }
        };
        let analysis = match self.analyze_final_image(image_url).await {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(canvas_id, error = %err, "final image analysis failed");
                error_text(&err)
            }
        };
        let title = match self.generate_title(&analysis, &summary).await {
            Ok(title) => title,
            Err(err) => {
                warn!(canvas_id, error = %err, "title generation failed");
                error_text(&err)
            }
        };
        let background = match self.generate_background(&analysis, &summary).await {
            Ok(url) => url,
            Err(err) => {
                warn!(canvas_id, error = %err, "background generation failed");
                error_text(&err)
            }
        };

        let all_ok = [&summary, &analysis, &title, &background]
            .iter()
            .all(|field| !field.starts_with("error:"));

        self.store.mutate(canvas_id, |session| {
            session.summary = summary.clone();
            session.final_analysis = analysis.clone();
            session.title = title.clone();
            session.background_image = background.clone();
            session.image_url = Some(image_url.to_string());
            session.phase = SessionPhase::Completed;
        })?;

        let closing = if all_ok {
            let text = format!(
                "우와, 정말 멋진 그림이 완성됐구나! 우리가 함께 만든 그림에 '{title}'라는 \
                 제목을 붙여봤어. 오늘 함께 그려서 정말 즐거웠어!"
            );
            self.store.mutate(canvas_id, |session| {
                session.push_turn(Role::Assistant, text.clone());
            })?;
            match self.provider.synthesize(&text).await {
                Ok(audio) => {
                    self.store
                        .mutate(canvas_id, |session| session.audio = audio.clone())?;
                    Some(SpokenMessage { text, audio })
                }
                Err(err) => {
                    warn!(canvas_id, error = %err, "closing message synthesis failed");
                    None
                }
            }
        } else {
            None
        };

        let conversation_history = self
            .history(canvas_id)?
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text))
            .collect();

        Ok(CompletionReport {
            analysis,
            summary,
            title,
            background_image: background,
            conversation_history,
            closing,
        })
    }

    async fn summarize(&self, session: &Session) -> Result<String, CoreError> {
        let transcript = session
            .conversation
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(transcript),
        ];
        self.provider.complete(&messages).await
    }

    /// Downloads the final image bytes first; an empty body is a validation
    /// failure, then the inline bytes go through vision analysis.
    async fn analyze_final_image(&self, image_url: &str) -> Result<String, CoreError> {
        let bytes = self.provider.fetch_image(image_url).await?;
        if bytes.is_empty() {
            return Err(CoreError::Validation(format!(
                "downloaded image from {image_url} is empty"
            )));
        }
        self.provider
            .analyze_image(VISION_INSTRUCTION, &ImageSource::Png(bytes))
            .await
    }

    async fn generate_title(&self, analysis: &str, summary: &str) -> Result<String, CoreError> {
        let messages = [
            ChatMessage::system(TITLE_SYSTEM_PROMPT),
            ChatMessage::user(format!("그림 분석:\n{analysis}\n\n대화 요약:\n{summary}")),
        ];
        let title = self.provider.complete(&messages).await?;
        Ok(title.trim().trim_matches('"').to_string())
    }

    /// Two-step pipeline: a chat completion writes the art prompt, then the
    /// image-generation capability returns the hosted URL.
    async fn generate_background(&self, analysis: &str, summary: &str) -> Result<String, CoreError> {
        let messages = [
            ChatMessage::system(BACKGROUND_SYSTEM_PROMPT),
            ChatMessage::user(format!("그림 분석:\n{analysis}\n\n대화 요약:\n{summary}")),
        ];
        let prompt = self.provider.complete(&messages).await?;
        self.provider.generate_image(&prompt).await
    }

    /// Ordered conversation history for the session.
    pub fn history(&self, canvas_id: &str) -> Result<Vec<Turn>, CoreError> {
        self.store
            .get(canvas_id)
            .map(|session| session.conversation)
            .ok_or_else(|| CoreError::SessionNotFound(canvas_id.to_string()))
    }

    pub fn session(&self, canvas_id: &str) -> Option<Session> {
        self.store.get(canvas_id)
    }

    /// Stateless chat passthrough: one user message, one completion reply.
    pub async fn chat(&self, message: &str) -> Result<String, CoreError> {
        self.provider.complete(&[ChatMessage::user(message)]).await
    }
}
