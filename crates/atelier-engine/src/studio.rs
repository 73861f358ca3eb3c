use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use atelier_contracts::assets::ImageAsset;
use atelier_contracts::document::GenerationDocument;
use atelier_contracts::errors::{classify_failure, expect_image, expect_text, ClassifiedError};
use atelier_contracts::events::{EventPayload, EventWriter};
use atelier_contracts::history::HistoryStore;
use atelier_contracts::models::{ModelSelection, ModelSelector};
use atelier_contracts::requests::{GenerationRequest, OperationKind};
use atelier_contracts::runs::HistoryPosition;
use atelier_contracts::selection::{
    BackgroundOption, FitOption, PoseOption, SelectionError, SelectionState,
};
use serde_json::{json, Value};

use crate::prompts::{
    build_enhance_request, build_suggestion_request, build_try_on_request,
    try_on_progress_label, TryOnInputs, ENHANCE_PROGRESS,
};
use crate::{map_object, resolve_request_timeout, BackendCall, BackendRegistry, GenerationBackend};

pub const MAX_SUGGESTIONS: usize = 5;

const SUGGEST_THREAD_NAME: &str = "atelier-suggest";

/// Receives human-readable status lines before a remote call is made.
pub trait ProgressSink {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str),
{
    fn report(&self, message: &str) {
        self(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StudioError {
    #[error("A generation is already in progress. Wait for it to finish.")]
    Busy,
    #[error("Upload your photo to get started.")]
    MissingBaseImage,
    #[error("Add an outfit or describe a change to make.")]
    NothingToApply,
    #[error("There is no generated image to enhance yet.")]
    NothingToEnhance,
    #[error("No suggestion at position {index} ({count} available).")]
    SuggestionOutOfRange { index: usize, count: usize },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Remote(#[from] ClassifiedError),
}

impl StudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::MissingBaseImage => "missing_base_image",
            Self::NothingToApply => "nothing_to_apply",
            Self::NothingToEnhance => "nothing_to_enhance",
            Self::SuggestionOutOfRange { .. } => "suggestion_out_of_range",
            Self::Selection(_) => "selection",
            Self::Remote(err) => err.kind(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudioConfig {
    pub image_model: Option<String>,
    pub text_model: Option<String>,
    pub request_timeout_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudioStats {
    pub generations: u64,
    pub enhancements: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub image: ImageAsset,
    pub request: GenerationRequest,
    pub model: String,
    pub provider: String,
    pub history: HistoryPosition,
    /// Style suggestions started after a first try-on with garments.
    pub suggestions: Option<SuggestionJob>,
}

/// Handle to a background suggestion call.
#[derive(Debug)]
pub struct SuggestionJob {
    epoch: u64,
    handle: Option<JoinHandle<Option<Vec<String>>>>,
}

impl SuggestionJob {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Blocks until the call completes. `None` means the result was superseded by a
    /// newer generation (or the worker could not run) and was not published.
    pub fn wait(self) -> Option<Vec<String>> {
        self.handle?.join().ok().flatten()
    }
}

#[derive(Debug, Default)]
struct SuggestionBoard {
    epoch: u64,
    pending: bool,
    items: Vec<String>,
}

#[derive(Clone)]
struct SuggestionService {
    backend: Arc<dyn GenerationBackend>,
    model: String,
    timeout_s: f64,
    events: EventWriter,
    board: Arc<Mutex<SuggestionBoard>>,
}

impl SuggestionService {
    /// Invalidates whatever is on the board, including calls still in flight.
    fn supersede(&self) -> u64 {
        let mut board = lock(&self.board);
        board.epoch += 1;
        board.pending = false;
        board.items.clear();
        board.epoch
    }

    fn snapshot(&self) -> (bool, Vec<String>) {
        let board = lock(&self.board);
        (board.pending, board.items.clone())
    }

    fn fetch(&self, base_image: &ImageAsset, garments: &[ImageAsset]) -> Vec<String> {
        let operation = OperationKind::Suggest;
        let request = build_suggestion_request(base_image, garments);
        let call = BackendCall {
            model: &self.model,
            request: &request,
            timeout_s: self.timeout_s,
        };
        let outcome = self
            .backend
            .call(&call)
            .map_err(|failure| classify_failure(operation, &failure))
            .and_then(|reply| expect_text(operation, &reply));
        match outcome {
            Ok(text) => parse_suggestions(&text),
            Err(err) => {
                let _ = self.events.emit(
                    "suggestions_failed",
                    map_object(json!({
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                Vec::new()
            }
        }
    }

    fn spawn(&self, base_image: ImageAsset, garments: Vec<ImageAsset>) -> SuggestionJob {
        let epoch = {
            let mut board = lock(&self.board);
            board.pending = true;
            board.epoch
        };
        let _ = self.events.emit(
            "suggestions_started",
            map_object(json!({
                "mode": "background",
                "epoch": epoch,
                "model": self.model,
                "garments": garments.len(),
            })),
        );

        let service = self.clone();
        let spawned = thread::Builder::new()
            .name(SUGGEST_THREAD_NAME.to_string())
            .spawn(move || {
                let items = service.fetch(&base_image, &garments);
                service.publish(epoch, items)
            });
        match spawned {
            Ok(handle) => SuggestionJob {
                epoch,
                handle: Some(handle),
            },
            Err(err) => {
                let mut board = lock(&self.board);
                if board.epoch == epoch {
                    board.pending = false;
                }
                drop(board);
                let _ = self.events.emit(
                    "suggestions_discarded",
                    map_object(json!({
                        "epoch": epoch,
                        "reason": format!("suggestion thread spawn failed: {err}"),
                    })),
                );
                SuggestionJob {
                    epoch,
                    handle: None,
                }
            }
        }
    }

    fn publish(&self, epoch: u64, items: Vec<String>) -> Option<Vec<String>> {
        let mut board = lock(&self.board);
        if board.epoch != epoch {
            let current_epoch = board.epoch;
            drop(board);
            let _ = self.events.emit(
                "suggestions_discarded",
                map_object(json!({
                    "epoch": epoch,
                    "current_epoch": current_epoch,
                    "count": items.len(),
                    "reason": "superseded",
                })),
            );
            return None;
        }
        board.items = items.clone();
        board.pending = false;
        drop(board);
        let _ = self.events.emit(
            "suggestions_ready",
            map_object(json!({
                "mode": "background",
                "epoch": epoch,
                "count": items.len(),
            })),
        );
        Some(items)
    }
}

/// Reads `{"suggestions": [...]}`, tolerating a fenced code block around it.
pub fn parse_suggestions(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    let Ok(parsed) = serde_json::from_str::<Value>(unfenced.trim()) else {
        return Vec::new();
    };
    parsed
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .take(MAX_SUGGESTIONS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn event_prefix(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::Generate => "generation",
        OperationKind::Enhance => "enhance",
        OperationKind::Suggest => "suggestions",
    }
}

/// One editing session: selection, versioned history and the remote calls that advance it.
///
/// Methods take `&self`; the type is `Send + Sync` so a display thread can read
/// [`Studio::current`] while another thread is blocked in a generation. History edits
/// (undo, redo, pending text, resets) and generate/enhance calls share one busy flag:
/// while one holds it the others are refused with [`StudioError::Busy`], so a result is
/// always pushed onto the document it was built from.
pub struct Studio {
    events: EventWriter,
    image_backend: Arc<dyn GenerationBackend>,
    image_model: ModelSelection,
    text_model: ModelSelection,
    request_timeout_s: f64,
    suggestions: SuggestionService,
    selection: Mutex<SelectionState>,
    history: Mutex<HistoryStore<GenerationDocument>>,
    busy: AtomicBool,
    welcome_seen: AtomicBool,
    generations: AtomicU64,
    enhancements: AtomicU64,
    failures: AtomicU64,
}

impl Studio {
    pub fn new(events: EventWriter, backends: &BackendRegistry, config: StudioConfig) -> Result<Self> {
        let selector = ModelSelector::new(None);
        let image_model = selector
            .select_for(config.image_model.as_deref(), OperationKind::Generate, None)
            .map_err(anyhow::Error::msg)?;
        let text_model = selector
            .select_for(
                config.text_model.as_deref(),
                OperationKind::Suggest,
                Some(&image_model.model.provider),
            )
            .map_err(anyhow::Error::msg)?;
        let image_backend = backends.get(&image_model.model.provider).with_context(|| {
            format!(
                "no backend registered for provider '{}'",
                image_model.model.provider
            )
        })?;
        let text_backend = backends.get(&text_model.model.provider).with_context(|| {
            format!(
                "no backend registered for provider '{}'",
                text_model.model.provider
            )
        })?;
        let request_timeout_s = resolve_request_timeout(config.request_timeout_s);

        events.emit(
            "session_started",
            map_object(json!({
                "image_model": image_model.model.name,
                "image_provider": image_model.model.provider,
                "image_fallback_reason": image_model.fallback_reason,
                "text_model": text_model.model.name,
                "text_provider": text_model.model.provider,
                "text_fallback_reason": text_model.fallback_reason,
                "request_timeout_s": request_timeout_s,
            })),
        )?;

        let suggestions = SuggestionService {
            backend: text_backend,
            model: text_model.model.name.clone(),
            timeout_s: request_timeout_s,
            events: events.clone(),
            board: Arc::new(Mutex::new(SuggestionBoard::default())),
        };

        Ok(Self {
            events,
            image_backend,
            image_model,
            text_model,
            request_timeout_s,
            suggestions,
            selection: Mutex::new(SelectionState::new()),
            history: Mutex::new(HistoryStore::new(GenerationDocument::seed(None))),
            busy: AtomicBool::new(false),
            welcome_seen: AtomicBool::new(false),
            generations: AtomicU64::new(0),
            enhancements: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn image_model(&self) -> &ModelSelection {
        &self.image_model
    }

    pub fn text_model(&self) -> &ModelSelection {
        &self.text_model
    }

    pub fn request_timeout_s(&self) -> f64 {
        self.request_timeout_s
    }

    pub fn stats(&self) -> StudioStats {
        StudioStats {
            generations: self.generations.load(Ordering::SeqCst),
            enhancements: self.enhancements.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }

    /// True exactly once per session.
    pub fn take_welcome(&self) -> bool {
        !self.welcome_seen.swap(true, Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(&self.busy))
    }

    /// Claims the busy flag for a history edit, so it cannot interleave with a remote call.
    fn begin_edit(&self) -> Result<BusyGuard<'_>, StudioError> {
        self.try_begin().ok_or(StudioError::Busy)
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = map_object(payload);
        let _ = self.events.emit(event_type, payload);
    }

    // history

    pub fn current(&self) -> GenerationDocument {
        lock(&self.history).current().clone()
    }

    pub fn can_undo(&self) -> bool {
        lock(&self.history).can_undo()
    }

    pub fn can_redo(&self) -> bool {
        lock(&self.history).can_redo()
    }

    pub fn history_position(&self) -> HistoryPosition {
        let history = lock(&self.history);
        HistoryPosition {
            cursor: history.cursor(),
            len: history.len(),
        }
    }

    /// `Ok(false)` at the start of history; refused while a generation is in flight.
    pub fn undo(&self) -> Result<bool, StudioError> {
        let _busy = self.begin_edit()?;
        Ok(self.move_history("undo", HistoryStore::undo))
    }

    pub fn redo(&self) -> Result<bool, StudioError> {
        let _busy = self.begin_edit()?;
        Ok(self.move_history("redo", HistoryStore::redo))
    }

    fn move_history(
        &self,
        direction: &str,
        step: fn(&mut HistoryStore<GenerationDocument>) -> bool,
    ) -> bool {
        let (moved, cursor, len) = {
            let mut history = lock(&self.history);
            let moved = step(&mut history);
            (moved, history.cursor(), history.len())
        };
        self.emit(
            "history_moved",
            json!({
                "direction": direction,
                "moved": moved,
                "cursor": cursor,
                "len": len,
            }),
        );
        moved
    }

    pub fn reset_history(&self, seed: GenerationDocument) -> Result<(), StudioError> {
        let _busy = self.begin_edit()?;
        self.reset_history_with_reason(seed, "explicit");
        Ok(())
    }

    fn reset_history_with_reason(&self, seed: GenerationDocument, reason: &str) {
        let has_base = seed.base_image().is_some();
        lock(&self.history).reset(seed);
        self.emit(
            "history_reset",
            json!({
                "reason": reason,
                "has_base_image": has_base,
            }),
        );
    }

    fn push_document(&self, document: GenerationDocument) -> HistoryPosition {
        let mut history = lock(&self.history);
        history.push(document);
        HistoryPosition {
            cursor: history.cursor(),
            len: history.len(),
        }
    }

    // selection

    pub fn selection(&self) -> SelectionState {
        lock(&self.selection).clone()
    }

    /// Replaces the person photo, resetting every option and starting a fresh history.
    pub fn set_person(&self, person: Option<ImageAsset>) -> Result<(), StudioError> {
        let _busy = self.begin_edit()?;
        lock(&self.selection).set_person(person.clone());
        self.suggestions.supersede();
        self.reset_history_with_reason(GenerationDocument::seed(person), "person_changed");
        Ok(())
    }

    /// Only edits the selection; pair with [`Studio::reset_generation_state`].
    pub fn add_garments(&self, garments: Vec<ImageAsset>) -> Result<bool, StudioError> {
        Ok(lock(&self.selection).add_garments(garments)?)
    }

    /// Only edits the selection; pair with [`Studio::reset_generation_state`].
    pub fn remove_garment(&self, index: usize) -> Result<ImageAsset, StudioError> {
        Ok(lock(&self.selection).remove_garment(index)?)
    }

    pub fn set_pose(&self, pose: PoseOption) {
        lock(&self.selection).set_pose(pose);
    }

    pub fn set_custom_pose_text(&self, text: &str) {
        lock(&self.selection).set_custom_pose_text(text);
    }

    pub fn set_fit(&self, fit: FitOption) {
        lock(&self.selection).set_fit(fit);
    }

    pub fn set_background(&self, background: BackgroundOption) {
        lock(&self.selection).set_background(background);
    }

    /// Restarts history from the person photo after the garment set changed.
    pub fn reset_generation_state(&self) -> Result<(), StudioError> {
        let _busy = self.begin_edit()?;
        let person = {
            let mut selection = lock(&self.selection);
            selection.set_background(BackgroundOption::Custom);
            selection.person().cloned()
        };
        self.suggestions.supersede();
        self.reset_history_with_reason(GenerationDocument::seed(person), "generation_state");
        Ok(())
    }

    pub fn start_over(&self) -> Result<(), StudioError> {
        let _busy = self.begin_edit()?;
        *lock(&self.selection) = SelectionState::new();
        self.suggestions.supersede();
        self.reset_history_with_reason(GenerationDocument::seed(None), "start_over");
        Ok(())
    }

    // pending text

    pub fn set_pending_custom_edit(&self, text: &str) -> Result<HistoryPosition, StudioError> {
        let _busy = self.begin_edit()?;
        let next = self.current().with_custom_edit_text(text);
        Ok(self.push_pending(next, "custom_edit", text))
    }

    pub fn set_pending_background_edit(&self, text: &str) -> Result<HistoryPosition, StudioError> {
        let _busy = self.begin_edit()?;
        let next = self.current().with_background_edit_text(text);
        Ok(self.push_pending(next, "background_edit", text))
    }

    fn push_pending(&self, next: GenerationDocument, field: &str, text: &str) -> HistoryPosition {
        let position = self.push_document(next);
        self.emit(
            "pending_text_updated",
            json!({
                "field": field,
                "chars": text.chars().count(),
                "cursor": position.cursor,
                "len": position.len,
            }),
        );
        position
    }

    // suggestions

    pub fn suggestions(&self) -> Vec<String> {
        self.suggestions.snapshot().1
    }

    pub fn suggestions_pending(&self) -> bool {
        self.suggestions.snapshot().0
    }

    /// Refinements take the suggestion as the whole edit; otherwise it is appended.
    pub fn apply_suggestion(&self, index: usize) -> Result<String, StudioError> {
        let items = self.suggestions();
        let Some(suggestion) = items.get(index) else {
            return Err(StudioError::SuggestionOutOfRange {
                index,
                count: items.len(),
            });
        };
        let _busy = self.begin_edit()?;
        let document = self.current();
        let text = if document.is_refinement() {
            suggestion.clone()
        } else {
            format!("{} {}", document.custom_edit_text(), suggestion)
                .trim()
                .to_string()
        };
        self.push_pending(document.with_custom_edit_text(text.as_str()), "custom_edit", &text);
        Ok(text)
    }

    /// Standalone suggestion call. Never fails: any problem yields an empty list.
    pub fn request_suggestions(&self, base_image: &ImageAsset, garments: &[ImageAsset]) -> Vec<String> {
        self.emit(
            "suggestions_started",
            json!({
                "mode": "standalone",
                "model": self.text_model.model.name,
                "garments": garments.len(),
            }),
        );
        let items = self.suggestions.fetch(base_image, garments);
        self.emit(
            "suggestions_ready",
            json!({
                "mode": "standalone",
                "count": items.len(),
            }),
        );
        items
    }

    // remote operations

    fn reject(&self, operation: OperationKind, err: StudioError) -> StudioError {
        self.emit(
            "generation_rejected",
            json!({
                "operation": operation.as_str(),
                "reason": err.kind(),
                "message": err.to_string(),
            }),
        );
        err
    }

    fn invoke_image(&self, request: &GenerationRequest) -> Result<ImageAsset, StudioError> {
        let operation = request.kind;
        let prefix = event_prefix(operation);
        self.emit(
            &format!("{prefix}_started"),
            json!({
                "model": self.image_model.model.name,
                "provider": self.image_model.model.provider,
                "attachments": request.attachment_summary(),
                "instructions_chars": request.instructions.chars().count(),
            }),
        );

        let call = BackendCall {
            model: &self.image_model.model.name,
            request,
            timeout_s: self.request_timeout_s,
        };
        let result = self
            .image_backend
            .call(&call)
            .map_err(|failure| classify_failure(operation, &failure))
            .and_then(|reply| expect_image(operation, &reply))
            .and_then(|(mime_type, data)| {
                ImageAsset::from_base64(&mime_type, &data).map_err(|err| {
                    ClassifiedError::Unknown {
                        operation,
                        detail: Some(format!("{err:#}")),
                    }
                })
            });

        result.map_err(|err| {
            self.failures.fetch_add(1, Ordering::SeqCst);
            self.emit(
                &format!("{prefix}_failed"),
                json!({
                    "error_kind": err.kind(),
                    "message": err.to_string(),
                    "retriable": err.is_retriable(),
                }),
            );
            StudioError::Remote(err)
        })
    }

    fn finish(
        &self,
        operation: OperationKind,
        image: ImageAsset,
        request: GenerationRequest,
        history: HistoryPosition,
        suggestions: Option<SuggestionJob>,
    ) -> GenerationOutcome {
        self.emit(
            &format!("{}_finished", event_prefix(operation)),
            json!({
                "mime_type": image.mime_type().as_str(),
                "bytes": image.len(),
                "digest": image.digest(),
                "cursor": history.cursor,
                "len": history.len,
                "suggestions_started": suggestions.is_some(),
            }),
        );
        GenerationOutcome {
            image,
            request,
            model: self.image_model.model.name.clone(),
            provider: self.image_model.model.provider.clone(),
            history,
            suggestions,
        }
    }

    /// Composes a try-on request from the selection and the current document, runs it,
    /// and pushes the result. A first generation with garments also starts a suggestion
    /// call on a background thread.
    pub fn build_and_generate(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<GenerationOutcome, StudioError> {
        let operation = OperationKind::Generate;
        let Some(_busy) = self.try_begin() else {
            return Err(self.reject(operation, StudioError::Busy));
        };
        let selection = self.selection();
        let document = self.current();
        let Some(base_image) = document.base_image().cloned() else {
            return Err(self.reject(operation, StudioError::MissingBaseImage));
        };
        let is_refinement = document.is_refinement();
        // Garments were already applied to a generated base image.
        let garments: &[ImageAsset] = if is_refinement {
            &[]
        } else {
            selection.garments()
        };
        let inputs = TryOnInputs {
            base_image: &base_image,
            garments,
            pose: selection.pose(),
            custom_pose_text: selection.custom_pose_text(),
            fit: selection.fit(),
            background: selection.background(),
            background_text: document.background_edit_text(),
            custom_edit_text: document.custom_edit_text(),
        };
        if !is_refinement && !inputs.has_changes() {
            return Err(self.reject(operation, StudioError::NothingToApply));
        }

        self.suggestions.supersede();
        let request = build_try_on_request(&inputs);
        progress.report(try_on_progress_label(&inputs));
        let image = self.invoke_image(&request)?;

        let history = self.push_document(GenerationDocument::generated(image.clone()));
        self.generations.fetch_add(1, Ordering::SeqCst);
        let suggestions = (!is_refinement && selection.has_garments()).then(|| {
            self.suggestions
                .spawn(base_image.clone(), selection.garments().to_vec())
        });
        Ok(self.finish(operation, image, request, history, suggestions))
    }

    /// Enhances the current generated image. Pending edit text is carried over.
    pub fn build_and_enhance(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<GenerationOutcome, StudioError> {
        let operation = OperationKind::Enhance;
        let Some(_busy) = self.try_begin() else {
            return Err(self.reject(operation, StudioError::Busy));
        };
        let document = self.current();
        let Some(image) = document.generated_image().cloned() else {
            return Err(self.reject(operation, StudioError::NothingToEnhance));
        };

        self.suggestions.supersede();
        let request = build_enhance_request(&image);
        progress.report(ENHANCE_PROGRESS);
        let enhanced = self.invoke_image(&request)?;

        let history = self.push_document(document.with_result(enhanced.clone()));
        self.enhancements.fetch_add(1, Ordering::SeqCst);
        Ok(self.finish(operation, enhanced, request, history, None))
    }
}
