use crate::compiler::Language;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        NoWorkerAvailable(lang: Language) {
            description("no worker available")
            display("no {} worker is currently registered", lang)
        }
        MalformedMessage(detail: String) {
            description("malformed message")
            display("malformed message: {}", detail)
        }
        RequestTooLarge(len: usize, max: usize) {
            description("compile request too large")
            display("compile request of {} bytes exceeds the {} byte limit", len, max)
        }
        LanguageUnsupported(lang: Language) {
            description("no toolchain for language")
            display("no toolchain is configured for {}", lang)
        }
    }
}
