//! Declarative helpers for the fixed lookup tables of the crate.

/// Defines the controller command set.
///
/// Every entry carries its wire tag and the snake_case label used for
/// display and parsing.
macro_rules! define_command {
    ($($(#[$meta:meta])* $name:ident = $tag:literal => $label:literal),* $(,)?) => {
        /// Actuator command understood by the room controller.
        ///
        /// The discriminant is the tag sent on both transports.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Command {
            $($(#[$meta])* $name = $tag,)*
        }

        impl Command {
            /// All commands in tag order.
            pub const ALL: &'static [Command] = &[$(Command::$name),*];

            /// Integer tag used on the wire.
            pub fn tag(self) -> u8 {
                self as u8
            }

            /// Looks up a command by its wire tag.
            pub fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $($tag => Some(Command::$name),)*
                    _ => None,
                }
            }

            /// Snake_case name of the command (e.g. `channel1_on`).
            pub fn label(self) -> &'static str {
                match self {
                    $(Command::$name => $label,)*
                }
            }

            fn from_label(label: &str) -> Option<Self> {
                match label {
                    $($label => Some(Command::$name),)*
                    _ => None,
                }
            }
        }
    };
}

/// Defines numeric error codes and their human readable messages.
macro_rules! define_error_codes {
    ($($name:ident = $code:literal => $msg:literal),* $(,)?) => {
        $(pub const $name: u32 = $code;)*

        /// Returns the message registered for `code`.
        pub fn get_error_message(code: u32) -> &'static str {
            match code {
                $($code => $msg,)*
                _ => "Unknown Error",
            }
        }
    };
}
