use super::{KeyChord, KeyInjector};
use crate::error::DispatchError;

/// Posts the chord through the platform's input event queue.
#[derive(Debug, Default)]
pub struct SystemKeyInjector;

impl SystemKeyInjector {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "macos")]
impl KeyInjector for SystemKeyInjector {
    fn send_chord(&self, chord: &KeyChord) -> Result<(), DispatchError> {
        quartz::post_chord(chord)
    }
}

#[cfg(not(target_os = "macos"))]
impl KeyInjector for SystemKeyInjector {
    fn send_chord(&self, _chord: &KeyChord) -> Result<(), DispatchError> {
        Err(DispatchError::Unsupported)
    }
}

#[cfg(target_os = "macos")]
mod quartz {
    use std::ffi::c_void;

    use super::super::{Key, KeyChord, Modifier};
    use crate::error::DispatchError;

    type CGEventRef = *mut c_void;
    type CGEventSourceRef = *mut c_void;
    type CGKeyCode = u16;

    // kCGHIDEventTap
    const K_CG_HID_EVENT_TAP: u32 = 0;

    const FLAG_SHIFT: u64 = 0x0002_0000;
    const FLAG_CONTROL: u64 = 0x0004_0000;
    const FLAG_ALTERNATE: u64 = 0x0008_0000;
    const FLAG_COMMAND: u64 = 0x0010_0000;

    #[link(name = "CoreGraphics", kind = "framework")]
    unsafe extern "C" {
        fn CGEventCreateKeyboardEvent(
            source: CGEventSourceRef,
            keycode: CGKeyCode,
            key_down: bool,
        ) -> CGEventRef;
        fn CGEventSetFlags(event: CGEventRef, flags: u64);
        fn CGEventPost(tap: u32, event: CGEventRef);
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    unsafe extern "C" {
        fn CFRelease(cf: *const c_void);
    }

    fn modifier_flag(modifier: Modifier) -> u64 {
        match modifier {
            Modifier::Ctrl => FLAG_CONTROL,
            Modifier::Alt => FLAG_ALTERNATE,
            Modifier::Shift => FLAG_SHIFT,
            Modifier::Cmd => FLAG_COMMAND,
        }
    }

    fn modifier_keycode(modifier: Modifier) -> CGKeyCode {
        match modifier {
            Modifier::Cmd => 0x37,
            Modifier::Shift => 0x38,
            Modifier::Alt => 0x3A,
            Modifier::Ctrl => 0x3B,
        }
    }

    // ANSI virtual key codes from HIToolbox/Events.h
    fn keycode(key: Key) -> Option<CGKeyCode> {
        let code = match key {
            Key::Char(c) => match c {
                'a' => 0x00,
                's' => 0x01,
                'd' => 0x02,
                'f' => 0x03,
                'h' => 0x04,
                'g' => 0x05,
                'z' => 0x06,
                'x' => 0x07,
                'c' => 0x08,
                'v' => 0x09,
                'b' => 0x0B,
                'q' => 0x0C,
                'w' => 0x0D,
                'e' => 0x0E,
                'r' => 0x0F,
                'y' => 0x10,
                't' => 0x11,
                '1' => 0x12,
                '2' => 0x13,
                '3' => 0x14,
                '4' => 0x15,
                '6' => 0x16,
                '5' => 0x17,
                '9' => 0x19,
                '7' => 0x1A,
                '8' => 0x1C,
                '0' => 0x1D,
                'o' => 0x1F,
                'u' => 0x20,
                'i' => 0x22,
                'p' => 0x23,
                'l' => 0x25,
                'j' => 0x26,
                'k' => 0x28,
                'n' => 0x2D,
                'm' => 0x2E,
                _ => return None,
            },
            Key::Function(n) => match n {
                1 => 0x7A,
                2 => 0x78,
                3 => 0x63,
                4 => 0x76,
                5 => 0x60,
                6 => 0x61,
                7 => 0x62,
                8 => 0x64,
                9 => 0x65,
                10 => 0x6D,
                11 => 0x67,
                12 => 0x6F,
                _ => return None,
            },
            Key::Escape => 0x35,
            Key::Tab => 0x30,
            Key::Enter => 0x24,
            Key::Space => 0x31,
        };
        Some(code)
    }

    fn post(keycode: CGKeyCode, key_down: bool, flags: u64) -> Result<(), DispatchError> {
        unsafe {
            let event = CGEventCreateKeyboardEvent(std::ptr::null_mut(), keycode, key_down);
            if event.is_null() {
                return Err(DispatchError::KeyInjection(format!(
                    "CGEventCreateKeyboardEvent returned null for keycode {keycode:#x}"
                )));
            }
            CGEventSetFlags(event, flags);
            CGEventPost(K_CG_HID_EVENT_TAP, event);
            CFRelease(event as *const c_void);
        }
        Ok(())
    }

    pub(super) fn post_chord(chord: &KeyChord) -> Result<(), DispatchError> {
        let key = keycode(chord.key())
            .ok_or_else(|| DispatchError::KeyInjection(format!("no keycode for {chord}")))?;
        let modifiers: Vec<(CGKeyCode, u64)> = chord
            .modifiers()
            .iter()
            .map(|m| (modifier_keycode(*m), modifier_flag(*m)))
            .collect();

        super::press_chord(&modifiers, key, post)
    }
}

/// Presses modifiers in order, taps the key, then releases in reverse.
///
/// Every modifier that went down is released even if a later event fails;
/// the first error is returned.
#[cfg(any(target_os = "macos", test))]
fn press_chord<F>(modifiers: &[(u16, u64)], key: u16, mut post: F) -> Result<(), DispatchError>
where
    F: FnMut(u16, bool, u64) -> Result<(), DispatchError>,
{
    let mut flags = 0;
    let mut pressed = 0;
    let mut outcome = Ok(());

    for &(code, flag) in modifiers {
        if let Err(err) = post(code, true, flags | flag) {
            outcome = Err(err);
            break;
        }
        flags |= flag;
        pressed += 1;
    }

    if outcome.is_ok() {
        outcome = post(key, true, flags).and_then(|()| post(key, false, flags));
    }

    for &(code, flag) in modifiers[..pressed].iter().rev() {
        flags &= !flag;
        if let Err(err) = post(code, false, flags) {
            outcome = outcome.and(Err(err));
        }
    }

    outcome
}
