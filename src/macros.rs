/// Declares a set of named frame-type codepoints as associated constants on
/// a `FrameType` unit struct, so the codec can match on `FrameType::STREAM`
/// etc. without a separate enum-to-u64 mapping to keep in sync.
#[macro_export]
macro_rules! frame_types {
    {$($name:ident = $encoding:expr),* $(,)?} => {
        pub struct FrameType;

        impl FrameType {
            $(pub const $name: u64 = $encoding;)*
        }
    }
}
