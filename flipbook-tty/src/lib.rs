use std::io::{self, Write};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use flipbook_core::Command;

mod render;

pub use render::{
    combine_status, format_editor_status, format_page_line, render_page_strip,
    render_viewer_page, truncate_with_ellipsis,
};

/// Text the user is typing at the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Rename,
    Upload,
    BulkUpload,
    Overlay,
    Password,
}

impl Prompt {
    fn prefix(self) -> &'static str {
        match self {
            Prompt::Rename => "rename: ",
            Prompt::Upload => "upload: ",
            Prompt::BulkUpload => "upload folder: ",
            Prompt::Overlay => "text: ",
            Prompt::Password => "password: ",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    /// Move the selected page by `delta` slots.
    MoveSelected { delta: isize },
    ClearSelected,
    RemoveOverlay,
    BeginPrompt(Prompt),
    PromptChanged { prompt: Prompt, text: String },
    PromptSubmit { prompt: Prompt, text: String },
    PromptCancel,
    Save,
    Reconcile,
    Publish,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Prompt(Prompt),
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    char_stack: String,
    mode: InputMode,
    prompt_buffer: String,
}

fn plain(modifiers: KeyModifiers) -> bool {
    modifiers.is_empty() || modifiers == KeyModifiers::SHIFT
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.reset_char_stack();
            self.prompt_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Opens a prompt with `text` already filled in.
    pub fn begin_prompt(&mut self, prompt: Prompt, text: &str) {
        self.set_mode(InputMode::Prompt(prompt));
        self.prompt_buffer.push_str(text);
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Prompt(prompt) => self.map_event_prompt(prompt, event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('d'), KeyModifiers::NONE) if self.char_stack.as_str() == "d" => {
                self.reset_count();
                self.reset_char_stack();
                UiEvent::ClearSelected
            }
            (KeyCode::Char('d'), KeyModifiers::NONE) => {
                if self.char_stack.is_empty() {
                    self.push_char('d');
                }
                UiEvent::None
            }
            (KeyCode::Char('r'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_all();
                UiEvent::Command(Command::Redo)
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char('l'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::Right, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Char('h'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::Left, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('J'), modifiers) if plain(modifiers) => {
                let delta = self.take_count() as isize;
                UiEvent::MoveSelected { delta }
            }
            (KeyCode::Char('K'), modifiers) if plain(modifiers) => {
                let delta = -(self.take_count() as isize);
                UiEvent::MoveSelected { delta }
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                self.reset_all();
                UiEvent::Command(Command::SelectPage { index: 0 })
            }
            (KeyCode::Char('G'), modifiers) if plain(modifiers) => {
                self.reset_all();
                UiEvent::Command(Command::SelectPage { index: usize::MAX })
            }
            (KeyCode::End, _) => {
                self.reset_all();
                UiEvent::Command(Command::SelectPage { index: usize::MAX })
            }
            (KeyCode::Char('a'), KeyModifiers::NONE) => {
                self.reset_all();
                UiEvent::Command(Command::AddPage)
            }
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_all();
                UiEvent::Command(Command::RemoveLastContentPage)
            }
            (KeyCode::Char('D'), modifiers) if plain(modifiers) => {
                self.reset_all();
                UiEvent::Command(Command::ClearAll)
            }
            (KeyCode::Char('u'), KeyModifiers::NONE) => {
                self.reset_all();
                UiEvent::Command(Command::Undo)
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => self.start_prompt(Prompt::Rename),
            (KeyCode::Char('o'), KeyModifiers::NONE) => self.start_prompt(Prompt::Upload),
            (KeyCode::Char('O'), modifiers) if plain(modifiers) => {
                self.start_prompt(Prompt::BulkUpload)
            }
            (KeyCode::Char('t'), KeyModifiers::NONE) => self.start_prompt(Prompt::Overlay),
            (KeyCode::Char('T'), modifiers) if plain(modifiers) => {
                self.reset_all();
                UiEvent::RemoveOverlay
            }
            (KeyCode::Char('s'), KeyModifiers::NONE) => {
                self.reset_all();
                UiEvent::Save
            }
            (KeyCode::Char('S'), modifiers) if plain(modifiers) => {
                self.reset_all();
                UiEvent::Reconcile
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) => {
                self.reset_all();
                UiEvent::Publish
            }
            (KeyCode::Char('q'), _) => {
                self.reset_all();
                UiEvent::Quit
            }
            _ => {
                self.reset_all();
                UiEvent::None
            }
        }
    }

    fn map_event_prompt(&mut self, prompt: Prompt, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancel
            }
            (KeyCode::Enter, _) => {
                let text = std::mem::take(&mut self.prompt_buffer);
                self.set_mode(InputMode::Normal);
                UiEvent::PromptSubmit { prompt, text }
            }
            (KeyCode::Backspace, _) => {
                self.prompt_buffer.pop();
                UiEvent::PromptChanged {
                    prompt,
                    text: self.prompt_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if plain(mods) => {
                self.prompt_buffer.push(c);
                UiEvent::PromptChanged {
                    prompt,
                    text: self.prompt_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn start_prompt(&mut self, prompt: Prompt) -> UiEvent {
        self.set_mode(InputMode::Prompt(prompt));
        UiEvent::BeginPrompt(prompt)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        self.reset_char_stack();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn push_char(&mut self, char: char) {
        self.char_stack.push(char);
    }

    fn reset_char_stack(&mut self) {
        self.char_stack.clear();
    }

    fn reset_all(&mut self) {
        self.reset_count();
        self.reset_char_stack();
    }

    /// What the user has typed so far: a count prefix, an unfinished `d`, or prompt text.
    pub fn pending_input(&self) -> Option<String> {
        if let InputMode::Prompt(prompt) = self.mode {
            let text = if prompt == Prompt::Password {
                "*".repeat(self.prompt_buffer.chars().count())
            } else {
                self.prompt_buffer.clone()
            };
            return Some(format!("{}{}", prompt.prefix(), text));
        }
        let mut pending = String::new();
        pending.push_str(&self.pending_digits);
        pending.push_str(&self.char_stack);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
