// crates/hap-media/src/texture.rs
//
// GPU upload and shading are out of scope (see SPEC_FULL.md Non-goals) —
// these are plain-data stand-ins for what a host's renderer would bind:
// the engine hands out a `DecodedTexture` per displayed frame and the
// host is responsible for getting its bytes onto the GPU however it
// likes. `ShaderProgram` carries the source a host compiles to convert
// the scaled YCoCg variant back to linear RGBA.

/// The codec tag a Hap video stream may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecTag {
    /// RGB DXT1 (BC1), no alpha.
    Hap1,
    /// RGBA DXT5 (BC3), with alpha.
    Hap5,
    /// YCoCg-scaled DXT5 — needs `ShaderProgram::for_tag` to display correctly.
    HapY,
}

/// One decoded video frame, ready for a host's GPU texture upload.
#[derive(Debug, Clone)]
pub struct DecodedTexture {
    pub pts: i64,
    pub width: u32,
    pub height: u32,
    pub format: CodecTag,
    pub bytes: Vec<u8>,
}

impl DecodedTexture {
    pub fn new(pts: i64, width: u32, height: u32, format: CodecTag, bytes: Vec<u8>) -> Self {
        Self { pts, width, height, format, bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A vertex/fragment program source pair. `Hap1`/`Hap5` don't need one —
/// the decoded bytes are already linear RGB(A) — so `for_tag` returns
/// `None` for them; only `HapY` does the CoCg+Y+scale → RGBA conversion.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub vertex_src: &'static str,
    pub fragment_src: &'static str,
}

const PASSTHROUGH_VERTEX_SRC: &str = "\
#version 150
in vec2 position;
in vec2 uv;
out vec2 v_uv;
void main() { v_uv = uv; gl_Position = vec4(position, 0.0, 1.0); }
";

const HAPY_FRAGMENT_SRC: &str = "\
#version 150
in vec2 v_uv;
out vec4 frag_color;
uniform sampler2D tex0;
void main() {
    vec4 s = texture(tex0, v_uv);
    float scale = 1.0 + 31.0 * s.a; // HapY packs a Co/Cg scale factor in alpha
    float co = (s.r - 0.5) * scale;
    float cg = (s.g - 0.5) * scale;
    float y = s.b;
    vec3 rgb = vec3(y + co - cg, y + cg, y - co - cg);
    frag_color = vec4(rgb, 1.0);
}
";

impl ShaderProgram {
    pub fn for_tag(tag: CodecTag) -> Option<Self> {
        match tag {
            CodecTag::HapY => Some(ShaderProgram {
                vertex_src: PASSTHROUGH_VERTEX_SRC,
                fragment_src: HAPY_FRAGMENT_SRC,
            }),
            CodecTag::Hap1 | CodecTag::Hap5 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_texture_reports_empty() {
        let t = DecodedTexture::new(0, 0, 0, CodecTag::Hap1, vec![]);
        assert!(t.is_empty());
    }

    #[test]
    fn hapy_gets_a_conversion_shader() {
        assert!(ShaderProgram::for_tag(CodecTag::HapY).is_some());
    }

    #[test]
    fn hap1_and_hap5_need_no_shader() {
        assert!(ShaderProgram::for_tag(CodecTag::Hap1).is_none());
        assert!(ShaderProgram::for_tag(CodecTag::Hap5).is_none());
    }
}
