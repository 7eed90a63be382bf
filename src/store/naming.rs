use super::client::ParticipantId;
use crate::session::SlotKey;

/// Object key for one stored clip: digit-major folders, participant-scoped
/// file names, variant as its 1-based ordinal.
///
/// `number_3/person17_var2.wav`
///
/// Names depend only on the participant and the slot, so re-sending a clip
/// lands on the same key instead of accumulating copies.
pub fn clip_path(id: &ParticipantId, key: SlotKey, content_type: &str) -> String {
    format!(
        "number_{}/person{}_var{}.{}",
        key.digit.value(),
        id.as_str(),
        key.variant.ordinal(),
        extension_for(content_type),
    )
}

/// File extension for a clip content type. The capture pipeline only emits
/// WAV today; unknown types fall back to that.
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        _ => "wav",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Digit, Variant};

    fn key(digit: u8, variant: Variant) -> SlotKey {
        SlotKey::new(Digit::new(digit).unwrap(), variant)
    }

    #[test]
    fn clip_path_uses_digit_folder_and_variant_ordinal() {
        let id = ParticipantId::new("17");
        assert_eq!(
            clip_path(&id, key(3, Variant::B), "audio/wav"),
            "number_3/person17_var2.wav"
        );
        assert_eq!(
            clip_path(&id, key(9, Variant::A), "audio/wav"),
            "number_9/person17_var1.wav"
        );
    }

    #[test]
    fn clip_path_is_stable_across_calls() {
        let id = ParticipantId::new("42");
        let first = clip_path(&id, key(5, Variant::C), "audio/wav");
        let second = clip_path(&id, key(5, Variant::C), "audio/wav");
        assert_eq!(first, second);
    }

    #[test]
    fn extension_follows_content_type() {
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("audio/webm"), "webm");
        assert_eq!(extension_for("application/octet-stream"), "wav");
    }
}
