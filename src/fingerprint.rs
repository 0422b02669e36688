use sha2::{Digest, Sha256};

/// 证据内容指纹 (SHA256，小写十六进制)
///
/// 只看原始字节：同一张图片无论从哪个平台、以什么文件名提交，指纹都一样。
/// 空字节没有指纹，查重会直接短路为“不重复”。
pub fn fingerprint(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// 嗅探图片 MIME 类型 (魔数)，识别不出来时按 PNG 处理
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("image/png")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            fingerprint(b"abc").as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn deterministic_and_content_sensitive() {
        assert_eq!(fingerprint(b"same bytes"), fingerprint(b"same bytes"));
        assert_ne!(fingerprint(b"same bytes"), fingerprint(b"same bytes!"));
    }

    #[test]
    fn empty_has_no_fingerprint() {
        assert_eq!(fingerprint(&[]), None);
    }

    #[test]
    fn mime_sniffing() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
        assert_eq!(sniff_mime(&jpeg), "image/jpeg");
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_mime(&png), "image/png");
        assert_eq!(sniff_mime(b"not an image"), "image/png");
    }
}
