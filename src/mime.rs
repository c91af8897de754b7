use std::path::Path;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension (lowercase, no dot) to content type.
static CONTENT_TYPES: &[(&str, &str)] = &[
    ("323", "text/h323"),
    ("ai", "application/postscript"),
    ("aif", "audio/x-aiff"),
    ("aifc", "audio/aiff"),
    ("aiff", "audio/aiff"),
    ("asf", "video/x-ms-asf"),
    ("asx", "video/x-ms-asf"),
    ("au", "audio/basic"),
    ("avi", "video/x-msvideo"),
    ("bas", "text/plain"),
    ("bin", "application/octet-stream"),
    ("bmp", "image/bmp"),
    ("c", "text/plain"),
    ("cer", "application/x-x509-ca-cert"),
    ("crl", "application/pkix-crl"),
    ("crt", "application/x-x509-ca-cert"),
    ("csh", "application/x-csh"),
    ("css", "text/css"),
    ("der", "application/x-x509-ca-cert"),
    ("dib", "image/bmp"),
    ("disco", "text/xml"),
    ("dll", "application/x-msdownload"),
    ("doc", "application/msword"),
    ("docm", "application/vnd.ms-word.document.macroEnabled.12"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("dot", "application/msword"),
    ("dotm", "application/vnd.ms-word.template.macroEnabled.12"),
    ("dotx", "application/vnd.openxmlformats-officedocument.wordprocessingml.template"),
    ("dvi", "application/x-dvi"),
    ("eml", "message/rfc822"),
    ("eps", "application/postscript"),
    ("etx", "text/x-setext"),
    ("exe", "application/octet-stream"),
    ("gif", "image/gif"),
    ("gtar", "application/x-gtar"),
    ("gz", "application/x-gzip"),
    ("h", "text/plain"),
    ("hdf", "application/x-hdf"),
    ("hqx", "application/mac-binhex40"),
    ("htc", "text/x-component"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("ief", "image/ief"),
    ("jfif", "image/pjpeg"),
    ("jpe", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "application/x-javascript"),
    ("latex", "application/x-latex"),
    ("m1v", "video/mpeg"),
    ("m3u", "audio/x-mpegurl"),
    ("man", "application/x-troff-man"),
    ("mdb", "application/x-msaccess"),
    ("me", "application/x-troff-me"),
    ("mht", "message/rfc822"),
    ("mhtml", "message/rfc822"),
    ("mid", "audio/mid"),
    ("mov", "video/quicktime"),
    ("movie", "video/x-sgi-movie"),
    ("mp2", "video/mpeg"),
    ("mp3", "audio/mpeg"),
    ("mpa", "video/mpeg"),
    ("mpe", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("mpp", "application/vnd.ms-project"),
    ("mpv2", "video/mpeg"),
    ("ms", "application/x-troff-ms"),
    ("nc", "application/x-netcdf"),
    ("nws", "message/rfc822"),
    ("oda", "application/oda"),
    ("p10", "application/pkcs10"),
    ("p12", "application/x-pkcs12"),
    ("p7b", "application/x-pkcs7-certificates"),
    ("p7c", "application/pkcs7-mime"),
    ("p7m", "application/pkcs7-mime"),
    ("p7r", "application/x-pkcs7-certreqresp"),
    ("p7s", "application/pkcs7-signature"),
    ("pbm", "image/x-portable-bitmap"),
    ("pdf", "application/pdf"),
    ("pfx", "application/x-pkcs12"),
    ("pgm", "image/x-portable-graymap"),
    ("png", "image/png"),
    ("pnm", "image/x-portable-anymap"),
    ("pot", "application/vnd.ms-powerpoint"),
    ("potm", "application/vnd.ms-powerpoint.template.macroEnabled.12"),
    ("potx", "application/vnd.openxmlformats-officedocument.presentationml.template"),
    ("ppam", "application/vnd.ms-powerpoint.addin.macroEnabled.12"),
    ("ppm", "image/x-portable-pixmap"),
    ("pps", "application/vnd.ms-powerpoint"),
    ("ppsm", "application/vnd.ms-powerpoint.slideshow.macroEnabled.12"),
    ("ppsx", "application/vnd.openxmlformats-officedocument.presentationml.slideshow"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptm", "application/vnd.ms-powerpoint.presentation.macroEnabled.12"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("ps", "application/postscript"),
    ("qt", "video/quicktime"),
    ("ra", "audio/x-pn-realaudio"),
    ("ram", "audio/x-pn-realaudio"),
    ("ras", "image/x-cmu-raster"),
    ("rgb", "image/x-rgb"),
    ("rmi", "audio/mid"),
    ("roff", "application/x-troff"),
    ("rtf", "application/rtf"),
    ("rtx", "text/richtext"),
    ("sh", "application/x-sh"),
    ("shar", "application/x-shar"),
    ("sit", "application/x-stuffit"),
    ("snd", "audio/basic"),
    ("stm", "text/html"),
    ("t", "application/x-troff"),
    ("tar", "application/x-tar"),
    ("tcl", "application/x-tcl"),
    ("tex", "application/x-tex"),
    ("texi", "application/x-texinfo"),
    ("texinfo", "application/x-texinfo"),
    ("tgz", "application/x-compressed"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("tr", "application/x-troff"),
    ("tsv", "text/tab-separated-values"),
    ("txt", "text/plain"),
    ("ustar", "application/x-ustar"),
    ("vcf", "text/x-vcard"),
    ("wav", "audio/wav"),
    ("wmf", "application/x-msmetafile"),
    ("wps", "application/vnd.ms-works"),
    ("wri", "application/x-mswrite"),
    ("wrl", "x-world/x-vrml"),
    ("wsdl", "text/xml"),
    ("xbm", "image/x-xbitmap"),
    ("xla", "application/vnd.ms-excel"),
    ("xlam", "application/vnd.ms-excel.addin.macroEnabled.12"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsb", "application/vnd.ms-excel.sheet.binary.macroEnabled.12"),
    ("xlsm", "application/vnd.ms-excel.sheet.macroEnabled.12"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xlt", "application/vnd.ms-excel"),
    ("xltm", "application/vnd.ms-excel.template.macroEnabled.12"),
    ("xltx", "application/vnd.openxmlformats-officedocument.spreadsheetml.template"),
    ("xml", "text/xml"),
    ("xpm", "image/x-xpixmap"),
    ("xsd", "text/xml"),
    ("xsl", "text/xml"),
    ("xwd", "image/x-xwindowdump"),
    ("z", "application/x-compress"),
    ("zip", "application/x-zip-compressed"),
];

pub fn lookup(extension: &str) -> Option<&'static str> {
    let extension = extension.to_ascii_lowercase();
    CONTENT_TYPES
        .binary_search_by(|(ext, _)| (*ext).cmp(extension.as_str()))
        .ok()
        .map(|index| CONTENT_TYPES[index].1)
}

/// Content type for a local file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(lookup)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
