//! VT sequence parser
//!
//! A closed state machine over the decoded character stream. Control and
//! escape sequences mutate the [`Screen`]; a handful of query sequences
//! produce a [`Response`] that the session writes back to the child.
//! Unrecognized sequences are consumed and discarded so a garbled escape
//! never corrupts subsequent parsing.

use super::screen::{AttrFlags, Charset, Color, CursorShape, Screen};

/// Response that needs to be sent back to the child process
#[derive(Debug, Clone)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Device attributes response
    DeviceAttributes,
    /// Secondary device attributes response
    SecondaryDeviceAttributes,
    /// Device status report: ESC [ 0 n
    StatusOk,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => {
                format!("\x1b[{};{}R", row, col).into_bytes()
            }
            Response::DeviceAttributes => {
                // VT220 response
                b"\x1b[?62;c".to_vec()
            }
            Response::SecondaryDeviceAttributes => {
                b"\x1b[>1;10;0c".to_vec()
            }
            Response::StatusOk => b"\x1b[0n".to_vec(),
        }
    }
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<char>,
    current_param: Option<u16>,
    osc_string: String,
}

#[derive(Clone, Copy, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC received within OSC, waiting for the ST backslash
    EscapeInOsc,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_string: String::new(),
        }
    }

    /// Drop any partially accumulated sequence and return to ground.
    pub fn reset(&mut self) {
        self.state = ParserState::Ground;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
        self.osc_string.clear();
    }

    /// Feed a single decoded character to the parser.
    pub fn feed(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        // C0 controls act anywhere except inside OSC strings
        if ch < '\u{20}'
            && self.state != ParserState::OscString
            && self.state != ParserState::EscapeInOsc
        {
            // a control other than ESC aborts any partial sequence, so a
            // garbled escape never swallows the byte that follows it
            if ch != '\u{1b}' && self.state != ParserState::Ground {
                self.reset();
            }
            match ch {
                '\u{1b}' => self.enter_escape(),
                '\u{07}' => screen.bell(),
                '\u{08}' => screen.backspace(),
                '\u{09}' => screen.horizontal_tab(),
                '\n' | '\u{0b}' | '\u{0c}' => screen.linefeed(),
                '\r' => screen.carriage_return(),
                '\u{0e}' => screen.select_charset(1),
                '\u{0f}' => screen.select_charset(0),
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => self.ground(ch, screen),
            ParserState::Escape => self.escape(ch, screen),
            ParserState::EscapeIntermediate => self.escape_intermediate(ch, screen),
            ParserState::CsiEntry => self.csi_entry(ch, screen),
            ParserState::CsiParam => self.csi_param(ch, screen),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, screen),
            ParserState::OscString => self.osc_string_state(ch, screen),
            ParserState::EscapeInOsc => self.escape_in_osc(ch, screen),
        }
    }

    fn escape_in_osc(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        if ch == '\\' {
            // ST (ESC \)
            self.execute_osc(screen);
            self.state = ParserState::Ground;
        } else {
            // Not ST; finish the OSC and treat this as a fresh escape
            self.execute_osc(screen);
            self.enter_escape();
            return self.escape(ch, screen);
        }
        None
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        if ch >= '\u{20}' && ch != '\u{7f}' {
            screen.put_char(ch);
        }
        None
    }

    fn escape(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            ']' => {
                self.state = ParserState::OscString;
                self.osc_string.clear();
            }
            '7' => {
                // DECSC
                screen.save_cursor();
                self.state = ParserState::Ground;
            }
            '8' => {
                // DECRC
                screen.restore_cursor();
                self.state = ParserState::Ground;
            }
            'D' => {
                // IND
                screen.index();
                self.state = ParserState::Ground;
            }
            'E' => {
                // NEL
                screen.carriage_return();
                screen.linefeed();
                self.state = ParserState::Ground;
            }
            'M' => {
                // RI
                screen.reverse_index();
                self.state = ParserState::Ground;
            }
            'c' => {
                // RIS - full reset, scrollback is kept
                screen.reset();
                self.reset();
            }
            '=' | '>' => {
                // keypad modes, consumed
                self.state = ParserState::Ground;
            }
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {
                tracing::debug!(final_char = %ch, "discarding unknown escape sequence");
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn escape_intermediate(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch);
            }
            '\u{30}'..='\u{7e}' => {
                // charset designation is the case we care about
                let slot = match self.intermediates.first() {
                    Some('(') => Some(0),
                    Some(')') => Some(1),
                    _ => None,
                };
                if let Some(slot) = slot {
                    let charset = match ch {
                        '0' => Charset::DecGraphics,
                        _ => Charset::Ascii,
                    };
                    screen.designate_charset(slot, charset);
                } else {
                    tracing::debug!(
                        intermediates = ?self.intermediates,
                        final_char = %ch,
                        "discarding unknown escape sequence"
                    );
                }
                self.state = ParserState::Ground;
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_entry(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '0'..='9' => {
                self.current_param = Some(ch as u16 - '0' as u16);
                self.state = ParserState::CsiParam;
            }
            ';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            '?' | '>' | '!' | '=' => {
                self.intermediates.push(ch);
            }
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '\u{40}'..='\u{7e}' => {
                return self.execute_csi(ch, screen);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_param(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            ';' | ':' => {
                // subparameter colons are treated as plain separators
                self.params.push(self.current_param.unwrap_or(0));
                self.current_param = None;
            }
            '\u{20}'..='\u{2f}' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '\u{40}'..='\u{7e}' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(ch, screen);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_intermediate(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch);
            }
            '\u{40}'..='\u{7e}' => {
                return self.execute_csi(ch, screen);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn osc_string_state(&mut self, ch: char, screen: &mut Screen) -> Option<Response> {
        match ch {
            '\u{07}' => {
                // BEL terminates OSC
                self.execute_osc(screen);
                self.state = ParserState::Ground;
            }
            '\u{1b}' => {
                self.state = ParserState::EscapeInOsc;
            }
            '\u{9c}' => {
                // ST
                self.execute_osc(screen);
                self.state = ParserState::Ground;
            }
            _ => {
                self.osc_string.push(ch);
            }
        }
        None
    }

    fn execute_csi(&mut self, final_char: char, screen: &mut Screen) -> Option<Response> {
        let is_private = self.intermediates.contains(&'?');
        let is_gt = self.intermediates.contains(&'>');
        let params = &self.params;

        let response = match (is_private, is_gt, final_char) {
            // Cursor movement
            (false, false, 'A') => {
                screen.cursor_up(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'B') => {
                screen.cursor_down(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'C') => {
                screen.cursor_forward(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'D') => {
                screen.cursor_backward(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'E') => {
                // CNL
                screen.cursor_down(params.first().copied().unwrap_or(1).max(1));
                screen.carriage_return();
                None
            }
            (false, false, 'F') => {
                // CPL
                screen.cursor_up(params.first().copied().unwrap_or(1).max(1));
                screen.carriage_return();
                None
            }
            (false, false, 'G') => {
                // CHA
                screen.set_cursor_column(params.first().copied().unwrap_or(1));
                None
            }
            (false, false, 'H') | (false, false, 'f') => {
                // CUP
                let row = params.first().copied().unwrap_or(1);
                let col = params.get(1).copied().unwrap_or(1);
                screen.cursor_position(row, col);
                None
            }
            (false, false, 'd') => {
                // VPA
                screen.set_cursor_row(params.first().copied().unwrap_or(1));
                None
            }

            // Erase
            (false, false, 'J') => {
                screen.erase_in_display(params.first().copied().unwrap_or(0));
                None
            }
            (false, false, 'K') => {
                screen.erase_in_line(params.first().copied().unwrap_or(0));
                None
            }

            // Line operations
            (false, false, 'L') => {
                screen.insert_lines(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'M') => {
                screen.delete_lines(params.first().copied().unwrap_or(1).max(1));
                None
            }

            // Character operations
            (false, false, '@') => {
                screen.insert_characters(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'P') => {
                screen.delete_characters(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'X') => {
                screen.erase_characters(params.first().copied().unwrap_or(1).max(1));
                None
            }

            // Scroll
            (false, false, 'S') => {
                screen.scroll_up(params.first().copied().unwrap_or(1).max(1));
                None
            }
            (false, false, 'T') => {
                screen.scroll_down(params.first().copied().unwrap_or(1).max(1));
                None
            }

            // Scroll region (DECSTBM)
            (false, false, 'r') => {
                let top = params.first().copied().unwrap_or(1);
                let bottom = params.get(1).copied().unwrap_or(screen.rows());
                screen.set_scroll_region(top, bottom);
                screen.cursor_position(1, 1);
                None
            }

            // SGR
            (false, false, 'm') => {
                self.execute_sgr(params, screen);
                None
            }

            // Save/restore cursor
            (false, false, 's') => {
                screen.save_cursor();
                None
            }
            (false, false, 'u') => {
                screen.restore_cursor();
                None
            }

            // Device Status Report
            (false, false, 'n') => match params.first().copied() {
                Some(5) => Some(Response::StatusOk),
                Some(6) => {
                    let cursor = screen.cursor();
                    Some(Response::CursorPosition(cursor.row + 1, cursor.col + 1))
                }
                _ => None,
            },

            // Device Attributes
            (false, false, 'c') => Some(Response::DeviceAttributes),
            (false, true, 'c') => Some(Response::SecondaryDeviceAttributes),

            // Private modes (DEC)
            (true, false, 'h') => {
                for &p in params {
                    screen.set_private_mode(p, true);
                }
                None
            }
            (true, false, 'l') => {
                for &p in params {
                    screen.set_private_mode(p, false);
                }
                None
            }

            // Standard modes
            (false, false, 'h') => {
                for &p in params {
                    match p {
                        4 => screen.modes.insert_mode = true,
                        20 => screen.modes.linefeed_newline = true,
                        _ => {}
                    }
                }
                None
            }
            (false, false, 'l') => {
                for &p in params {
                    match p {
                        4 => screen.modes.insert_mode = false,
                        20 => screen.modes.linefeed_newline = false,
                        _ => {}
                    }
                }
                None
            }

            _ => {
                // DECSCUSR (CSI Ps SP q)
                if final_char == 'q' && self.intermediates.contains(&' ') {
                    let shape = params.first().copied().unwrap_or(0) as u8;
                    screen.cursor_mut().shape = CursorShape::from_decscusr(shape);
                    self.state = ParserState::Ground;
                    return None;
                }

                tracing::debug!(
                    intermediates = ?self.intermediates,
                    params = ?params,
                    final_char = %final_char,
                    "discarding unknown CSI sequence"
                );
                None
            }
        };

        self.state = ParserState::Ground;
        response
    }

    fn execute_sgr(&self, params: &[u16], screen: &mut Screen) {
        if params.is_empty() {
            screen.current_attrs.reset();
            return;
        }

        let mut iter = params.iter().peekable();

        while let Some(&param) = iter.next() {
            match param {
                0 => screen.current_attrs.reset(),
                1 => screen.current_attrs.flags |= AttrFlags::BOLD,
                2 => screen.current_attrs.flags |= AttrFlags::DIM,
                3 => screen.current_attrs.flags |= AttrFlags::ITALIC,
                4 => screen.current_attrs.flags |= AttrFlags::UNDERLINE,
                5 => screen.current_attrs.flags |= AttrFlags::BLINK,
                7 => screen.current_attrs.flags |= AttrFlags::INVERSE,
                8 => screen.current_attrs.flags |= AttrFlags::HIDDEN,
                9 => screen.current_attrs.flags |= AttrFlags::STRIKETHROUGH,

                22 => screen.current_attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => screen.current_attrs.flags &= !AttrFlags::ITALIC,
                24 => screen.current_attrs.flags &= !AttrFlags::UNDERLINE,
                25 => screen.current_attrs.flags &= !AttrFlags::BLINK,
                27 => screen.current_attrs.flags &= !AttrFlags::INVERSE,
                28 => screen.current_attrs.flags &= !AttrFlags::HIDDEN,
                29 => screen.current_attrs.flags &= !AttrFlags::STRIKETHROUGH,

                30..=37 => {
                    screen.current_attrs.fg = Color::Indexed((param - 30) as u8);
                }
                38 => {
                    if let Some(&mode) = iter.next() {
                        match mode {
                            5 => {
                                if let Some(&n) = iter.next() {
                                    screen.current_attrs.fg = Color::Indexed(n as u8);
                                }
                            }
                            2 => {
                                let r = iter.next().copied().unwrap_or(0) as u8;
                                let g = iter.next().copied().unwrap_or(0) as u8;
                                let b = iter.next().copied().unwrap_or(0) as u8;
                                screen.current_attrs.fg = Color::Rgb(r, g, b);
                            }
                            _ => {}
                        }
                    }
                }
                39 => screen.current_attrs.fg = Color::Default,

                40..=47 => {
                    screen.current_attrs.bg = Color::Indexed((param - 40) as u8);
                }
                48 => {
                    if let Some(&mode) = iter.next() {
                        match mode {
                            5 => {
                                if let Some(&n) = iter.next() {
                                    screen.current_attrs.bg = Color::Indexed(n as u8);
                                }
                            }
                            2 => {
                                let r = iter.next().copied().unwrap_or(0) as u8;
                                let g = iter.next().copied().unwrap_or(0) as u8;
                                let b = iter.next().copied().unwrap_or(0) as u8;
                                screen.current_attrs.bg = Color::Rgb(r, g, b);
                            }
                            _ => {}
                        }
                    }
                }
                49 => screen.current_attrs.bg = Color::Default,

                90..=97 => {
                    screen.current_attrs.fg = Color::Indexed((param - 90 + 8) as u8);
                }
                100..=107 => {
                    screen.current_attrs.bg = Color::Indexed((param - 100 + 8) as u8);
                }

                _ => {}
            }
        }
    }

    fn execute_osc(&mut self, screen: &mut Screen) {
        // "code;text"
        if let Some(pos) = self.osc_string.find(';') {
            let code = &self.osc_string[..pos];
            let text = self.osc_string[pos + 1..].to_string();

            match code {
                "0" | "1" | "2" => screen.set_title(text),
                _ => {
                    tracing::debug!(code, "discarding unknown OSC sequence");
                }
            }
        }
        self.osc_string.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::screen::TermEvent;
    use crate::history::HistoryType;

    fn feed_str(parser: &mut VtParser, screen: &mut Screen, input: &str) -> Vec<Response> {
        let mut responses = Vec::new();
        for ch in input.chars() {
            if let Some(r) = parser.feed(ch, screen) {
                responses.push(r);
            }
        }
        responses
    }

    fn new_screen() -> Screen {
        Screen::new(80, 24, HistoryType::Bounded(100))
    }

    #[test]
    fn cursor_movement() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[5;10H");
        assert_eq!(screen.cursor().row, 4);
        assert_eq!(screen.cursor().col, 9);

        feed_str(&mut parser, &mut screen, "\x1b[2A\x1b[3C");
        assert_eq!(screen.cursor().row, 2);
        assert_eq!(screen.cursor().col, 12);
    }

    #[test]
    fn sgr_colors() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[31m");
        assert_eq!(screen.current_attrs.fg, Color::Indexed(1));

        feed_str(&mut parser, &mut screen, "\x1b[48;2;10;20;30m");
        assert_eq!(screen.current_attrs.bg, Color::Rgb(10, 20, 30));

        feed_str(&mut parser, &mut screen, "\x1b[0m");
        assert_eq!(screen.current_attrs.fg, Color::Default);
        assert_eq!(screen.current_attrs.bg, Color::Default);
    }

    #[test]
    fn osc_title_and_bell() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b]0;hello world\x07");
        assert_eq!(screen.title(), "hello world");
        feed_str(&mut parser, &mut screen, "\x07");
        let events = screen.take_events();
        assert!(events.contains(&TermEvent::TitleChanged("hello world".into())));
        assert!(events.contains(&TermEvent::Bell));
    }

    #[test]
    fn osc_with_st_terminator() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b]2;titled\x1b\\after");
        assert_eq!(screen.title(), "titled");
        assert_eq!(screen.line(0).unwrap().text(), "after");
    }

    #[test]
    fn unknown_csi_is_discarded_and_parsing_recovers() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[99999zok");
        assert_eq!(screen.line(0).unwrap().text(), "ok");
        assert_eq!(screen.cursor().col, 2);
    }

    #[test]
    fn garbled_escape_does_not_corrupt_stream() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b\u{1}text");
        assert_eq!(screen.line(0).unwrap().text(), "text");
    }

    #[test]
    fn control_byte_aborts_partial_csi() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[12\u{1}ok");
        assert_eq!(screen.line(0).unwrap().text(), "ok");
        assert_eq!(screen.cursor().col, 2);
    }

    #[test]
    fn linefeed_inside_csi_aborts_and_executes() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[3\nx");
        assert_eq!(screen.cursor().row, 1);
        assert_eq!(screen.line(1).unwrap().text(), "x");
    }

    #[test]
    fn alternate_screen_round_trip() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "primary");
        feed_str(&mut parser, &mut screen, "\x1b[?1049h");
        assert!(screen.using_alternate());
        feed_str(&mut parser, &mut screen, "alt");
        feed_str(&mut parser, &mut screen, "\x1b[?1049l");
        assert!(!screen.using_alternate());
        assert_eq!(screen.line(0).unwrap().text(), "primary");
    }

    #[test]
    fn device_status_report_responds() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[5;10H");
        let responses = feed_str(&mut parser, &mut screen, "\x1b[6n");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].to_bytes(), b"\x1b[5;10R");
    }

    #[test]
    fn charset_designation_via_escape() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b(0qk\x1b(Bq");
        assert_eq!(screen.line(0).unwrap().cells[0].c(), '─');
        assert_eq!(screen.line(0).unwrap().cells[1].c(), '┐');
        assert_eq!(screen.line(0).unwrap().cells[2].c(), 'q');
    }

    #[test]
    fn full_reset_keeps_scrollback() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        for _ in 0..30 {
            feed_str(&mut parser, &mut screen, "x\r\n");
        }
        let hist = screen.history_line_count();
        assert!(hist > 0);
        feed_str(&mut parser, &mut screen, "\x1bc");
        assert_eq!(screen.history_line_count(), hist);
        assert_eq!(screen.cursor().row, 0);
    }

    #[test]
    fn decscusr_sets_cursor_shape() {
        let mut screen = new_screen();
        let mut parser = VtParser::new();

        feed_str(&mut parser, &mut screen, "\x1b[5 q");
        assert_eq!(screen.cursor().shape, CursorShape::BlinkingBar);
    }
}
