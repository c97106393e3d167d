//! Conversation language and the fixed user-facing strings tied to it.
//!
//! Every string the engine produces on its own (greetings, apologies,
//! navigation acknowledgements, permission alerts) lives here so both
//! languages stay in lockstep.

use serde::{Deserialize, Serialize};

/// Languages the engine converses in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// Bengali.
    Bn,
}

impl Language {
    /// Two-letter tag used in backend request bodies.
    pub fn tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Bn => "bn",
        }
    }

    /// BCP-47 tag handed to capture and synthesis backends.
    pub fn speech_tag(self) -> &'static str {
        match self {
            Language::En => "en-US",
            Language::Bn => "bn-BD",
        }
    }

    /// Greeting turn seeded into a fresh or unreadable session log.
    pub fn greeting(self) -> &'static str {
        match self {
            Language::En => "Hi! Ask me anything. You can talk or type.",
            Language::Bn => "হ্যালো! আমাকে যেকোনো প্রশ্ন করো। বলেও পারো, লিখেও পারো।",
        }
    }

    /// Fixed apology substituted when the reply backend fails.
    pub fn reply_apology(self) -> &'static str {
        match self {
            Language::En => "Sorry, I couldn't get an answer right now. Please try again.",
            Language::Bn => "দুঃখিত, এখন উত্তরটা আনতে পারলাম না। একটু পরে আবার চেষ্টা করো।",
        }
    }

    /// Acknowledgement turn for a recognized navigation command.
    pub fn navigation_ack(self) -> &'static str {
        match self {
            Language::En => "Sure, here we go!",
            Language::Bn => "আচ্ছা, চলো যাই!",
        }
    }

    /// Alert shown when microphone permission is denied.
    pub fn permission_alert(self) -> &'static str {
        match self {
            Language::En => {
                "Microphone access is blocked. Allow it in your settings to talk to me."
            }
            Language::Bn => {
                "মাইক্রোফোনের অনুমতি নেই। কথা বলতে চাইলে সেটিংস থেকে মাইক্রোফোন চালু করো।"
            }
        }
    }

    /// Alert shown when no usable capture device exists.
    pub fn device_alert(self) -> &'static str {
        match self {
            Language::En => "No microphone was found. Check your audio input and try again.",
            Language::Bn => "কোনো মাইক্রোফোন পাওয়া যায়নি। অডিও ইনপুট দেখে আবার চেষ্টা করো।",
        }
    }

    /// Alert shown when the capture service loses its connection.
    pub fn network_alert(self) -> &'static str {
        match self {
            Language::En => "Voice recognition lost its connection. Check your network.",
            Language::Bn => "ভয়েস রিকগনিশনের সংযোগ বিচ্ছিন্ন হয়ে গেছে। নেটওয়ার্ক দেখে নাও।",
        }
    }

    /// Alert shown when capture keeps failing for no classifiable reason.
    pub fn capture_alert(self) -> &'static str {
        match self {
            Language::En => "Voice recognition stopped working. Turn the microphone on to retry.",
            Language::Bn => "ভয়েস রিকগনিশন কাজ করছে না। আবার চেষ্টা করতে মাইক্রোফোন চালু করো।",
        }
    }
}
