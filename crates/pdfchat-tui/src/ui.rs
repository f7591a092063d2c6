use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use pdfchat_core::{ChatMessage, ChatRole, Conversation, UploadStatus};
use crate::app::{App, InputMode};

/// Bubbles take at most this share of the chat width
const BUBBLE_WIDTH_PERCENT: usize = 75;

fn user_bubble_style() -> Style {
    Style::default().bg(Color::Blue).fg(Color::White)
}

fn assistant_bubble_style() -> Style {
    Style::default().bg(Color::Gray).fg(Color::Black)
}

/// Split `base`-styled text into spans, rendering **bold** and `code`
fn parse_markdown_line(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        let (closing, style) = match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                ("**", base.add_modifier(Modifier::BOLD))
            }
            '`' => ("`", base.add_modifier(Modifier::ITALIC).fg(Color::Magenta)),
            _ => {
                current_text.push(c);
                continue;
            }
        };

        // Collect until the closing marker
        let mut inner = String::new();
        let mut found_close = false;
        while let Some(c) = chars.next() {
            if closing == "**" && c == '*' && chars.peek() == Some(&'*') {
                chars.next();
                found_close = true;
                break;
            }
            if closing == "`" && c == '`' {
                found_close = true;
                break;
            }
            inner.push(c);
        }

        if found_close && !inner.is_empty() {
            if !current_text.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut current_text), base));
            }
            spans.push(Span::styled(inner, style));
        } else {
            // No closing marker, keep it literal
            current_text.push_str(closing);
            current_text.push_str(&inner);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, base));
    }
    spans
}

/// Greedy word wrap by character count. Words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for raw_line in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;

        for word in raw_line.split(' ').filter(|w| !w.is_empty()) {
            let mut word: Vec<char> = word.chars().collect();

            if current_len > 0 && current_len + 1 + word.len() > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }

            while word.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }

        lines.push(current);
    }

    lines
}

fn bubble_lines(msg: &ChatMessage, chat_width: usize) -> Vec<Line<'static>> {
    let (label, style, alignment) = match msg.role {
        ChatRole::User => ("You", user_bubble_style(), Alignment::Right),
        ChatRole::Assistant => ("Gemini", assistant_bubble_style(), Alignment::Left),
    };

    // Two columns of padding inside the bubble
    let bubble_width = (chat_width * BUBBLE_WIDTH_PERCENT / 100).max(8);
    let wrapped = wrap_text(&msg.content, bubble_width - 2);
    let inner_width = wrapped.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut lines = vec![Line::from(Span::styled(label, Style::default().fg(Color::DarkGray)))
        .alignment(alignment)];

    for text in wrapped {
        let padding = " ".repeat(inner_width - text.chars().count() + 1);
        let mut spans = vec![Span::styled(" ", style)];
        if msg.role == ChatRole::Assistant {
            spans.extend(parse_markdown_line(&text, style));
        } else {
            spans.push(Span::styled(text, style));
        }
        spans.push(Span::styled(padding, style));
        lines.push(Line::from(spans).alignment(alignment));
    }

    lines.push(Line::default());
    lines
}

/// Every line of the transcript, including the typing indicator
pub fn chat_lines(conversation: &Conversation, animation_frame: u8, chat_width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = conversation
        .messages()
        .iter()
        .flat_map(|msg| bubble_lines(msg, chat_width))
        .collect();

    if conversation.awaiting_reply() {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled("Gemini", Style::default().fg(Color::DarkGray))));
        lines.push(Line::from(Span::styled(
            format!(" Typing{:<3} ", dots),
            assistant_bubble_style().add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, upload_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_upload_status(app, frame, upload_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_upload_prompt {
        render_upload_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" PDF Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!(" {} ", app.client.model()), Style::default().fg(Color::White)),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.input_mode == InputMode::Normal {
            Color::Cyan
        } else {
            Color::DarkGray
        }))
        .title(" Conversation ");
    let inner = block.inner(area);

    let lines = if app.conversation.messages().is_empty() && !app.conversation.awaiting_reply() {
        vec![Line::from(Span::styled(
            "Upload a PDF with u (or Ctrl+U), then ask a question about it...",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        chat_lines(&app.conversation, app.animation_frame, inner.width as usize)
    };

    let max_scroll = (lines.len() as u16).saturating_sub(inner.height);
    if app.follow_bottom || app.chat_scroll >= max_scroll {
        app.chat_scroll = max_scroll;
        app.follow_bottom = true;
    }

    let chat = Paragraph::new(lines).block(block).scroll((app.chat_scroll, 0));
    frame.render_widget(chat, area);
}

fn render_upload_status(app: &App, frame: &mut Frame, area: Rect) {
    let conversation = &app.conversation;
    let line = match conversation.upload_status() {
        UploadStatus::Idle => Line::from(Span::styled(
            " No PDF uploaded",
            Style::default().fg(Color::DarkGray),
        )),
        UploadStatus::Extracting { file } => Line::from(Span::styled(
            format!(" Extracting text from {}...", file),
            Style::default().fg(Color::Yellow),
        )),
        UploadStatus::Ready { file, pages, .. } => Line::from(vec![
            Span::styled(" ✅ 1 PDF file uploaded", Style::default().fg(Color::Green)),
            Span::styled(
                format!(" ({}, {} pages)", file, pages),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        UploadStatus::Failed { file, error } => {
            let mut spans = vec![Span::styled(
                format!(" Could not read {}: {}", file, error),
                Style::default().fg(Color::Red),
            )];
            if conversation.file_uploaded() {
                spans.push(Span::styled(
                    " (still using the previous PDF)",
                    Style::default().fg(Color::DarkGray),
                ));
            }
            Line::from(spans)
        }
    };

    frame.render_widget(Paragraph::new(line), area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && !app.show_upload_prompt;
    let waiting = app.conversation.awaiting_reply();

    let (title, border_color) = if waiting {
        (" Waiting for reply... ", Color::DarkGray)
    } else if editing {
        (" Message (Enter to send) ", Color::Yellow)
    } else {
        (" Message (i to type) ", Color::DarkGray)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Scroll horizontally to keep the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.draft_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .conversation
        .draft()
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = if app.show_upload_prompt {
        (" UPLOAD ", Style::default().bg(Color::Green).fg(Color::Black))
    } else {
        match app.input_mode {
            InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
            InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        }
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [Span::styled(key, key_style), Span::styled(label, label_style)]
    };

    let hints: Vec<Span> = if app.show_upload_prompt {
        [hint(" Enter ", " upload "), hint(" Esc ", " cancel ")].concat()
    } else {
        match app.input_mode {
            InputMode::Normal => [
                hint(" i ", " type "),
                hint(" u ", " upload PDF "),
                hint(" j/k ", " scroll "),
                hint(" G ", " latest "),
                hint(" q ", " quit "),
            ]
            .concat(),
            InputMode::Editing => [
                hint(" Enter ", " send "),
                hint(" ^U ", " upload PDF "),
                hint(" Esc ", " stop typing "),
            ]
            .concat(),
        }
    };

    let footer_content = Line::from(
        vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)]
            .into_iter()
            .chain(hints)
            .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect) {
    // Centered popup, shrunk to fit small terminals
    let popup_width = 70.min(area.width.saturating_sub(4));
    let popup_height = 7.min(area.height);
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height).intersection(area);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green))
        .title(" Upload PDF ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    // Rows that don't fit are dropped, the input row goes last
    let row = |offset: u16| {
        (offset < inner.height).then(|| Rect::new(inner.x, inner.y + offset, inner.width, 1))
    };
    let (instructions_row, input_row) = if inner.height >= 3 {
        (row(0), row(2))
    } else {
        (None, row(0))
    };

    if let Some(rect) = instructions_row {
        let instructions = Paragraph::new("Path to a .pdf file. Enter to upload, Esc to cancel.")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(instructions, rect);
    }

    if let Some(input_area) = input_row {
        // Show the tail of long paths so the cursor stays visible
        let width = input_area.width as usize;
        let scroll_offset = app.upload_cursor.saturating_sub(width.saturating_sub(1));
        let visible: String = app.upload_input.chars().skip(scroll_offset).take(width).collect();
        frame.render_widget(
            Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
            input_area,
        );
        let cursor_x = (app.upload_cursor - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
    }

    if let (Some(error), Some(rect)) = (&app.upload_error, row(4)) {
        let status = Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red));
        frame.render_widget(status, rect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdfchat_core::pdf::ExtractedDocument;
    use pdfchat_core::{Action, GeminiClient, LopdfExtractor};
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(GeminiClient::new("test-key"), Arc::new(LopdfExtractor), tx)
    }

    fn screen_text(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn wrap_text_breaks_on_words() {
        assert_eq!(wrap_text("the quick brown fox", 10), vec!["the quick", "brown fox"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("one\n\ntwo", 10), vec!["one", "", "two"]);
    }

    #[test]
    fn markdown_styles_bold_and_code() {
        let spans = parse_markdown_line("a **b** `c` d", Style::default());
        let texts: Vec<&str> = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["a ", "b", " ", "c", " d"]);
        assert!(spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn unclosed_markdown_stays_literal() {
        let spans = parse_markdown_line("2 ** 3", Style::default());
        let text: String = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "2 ** 3");
    }

    #[test]
    fn user_bubbles_align_right_and_assistant_left() {
        let mut conversation = Conversation::new();
        conversation.dispatch(Action::SetDraft("hello".to_string()));
        let request = conversation.dispatch(Action::Submit).unwrap();
        conversation.dispatch(Action::ReplyReceived {
            request_id: request.request_id,
            result: Ok(serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#).unwrap()),
        });

        let lines = chat_lines(&conversation, 0, 40);
        // label, bubble, blank for each message
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1].alignment, Some(Alignment::Right));
        assert_eq!(lines[4].alignment, Some(Alignment::Left));
    }

    #[test]
    fn typing_indicator_shows_while_awaiting() {
        let mut app = test_app();
        app.conversation.dispatch(Action::SetDraft("question".to_string()));
        app.conversation.dispatch(Action::Submit);

        let screen = screen_text(&mut app);
        assert!(screen.contains("question"));
        assert!(screen.contains("Typing"));
        assert!(screen.contains("Waiting for reply"));
    }

    #[test]
    fn upload_indicator_shows_after_extraction() {
        let mut app = test_app();
        assert!(screen_text(&mut app).contains("No PDF uploaded"));

        app.conversation.dispatch(Action::UploadStarted { file: "report.pdf".to_string() });
        let upload_id = app.conversation.pending_upload().unwrap();
        app.apply_upload(
            upload_id,
            "report.pdf".to_string(),
            Ok(ExtractedDocument {
                text: "secret page text\n".to_string(),
                page_count: 3,
            }),
        );

        let screen = screen_text(&mut app);
        assert!(screen.contains("1 PDF file uploaded"));
        assert!(screen.contains("report.pdf, 3 pages"));
        assert!(!screen.contains("secret page text"));
    }

    fn render_at(app: &mut App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn upload_prompt_fits_short_terminals() {
        let mut app = test_app();
        app.open_upload_prompt();
        for c in "/tmp/a.pdf".chars() {
            app.upload_insert_char(c);
        }
        app.upload_error = Some("No such file: /tmp/a.pdf".to_string());

        for (width, height) in [(80, 5), (80, 3), (80, 1), (10, 3), (3, 2)] {
            render_at(&mut app, width, height);
        }

        // Only the input row fits inside a four-line popup
        let screen = render_at(&mut app, 80, 4);
        assert!(screen.contains("/tmp/a.pdf"));
        assert!(!screen.contains("Enter to upload"));
        assert!(!screen.contains("No such file"));
    }

    #[test]
    fn upload_prompt_shows_every_row_when_there_is_room() {
        let mut app = test_app();
        app.open_upload_prompt();
        app.upload_error = Some("Only .pdf files can be uploaded".to_string());

        let screen = render_at(&mut app, 80, 24);
        assert!(screen.contains("Upload PDF"));
        assert!(screen.contains("Enter to upload, Esc to cancel."));
        assert!(screen.contains("Only .pdf files can be uploaded"));
    }
}
