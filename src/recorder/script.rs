//! Page-side capture script used by the WebDriver page
//!
//! The script keeps its state in `window.__retrace_*` globals, queues events
//! for the driver to drain, and mirrors the queue into `sessionStorage` so
//! events captured just before an unload survive into the next page.

/// Attaches the capture listeners; safe to run more than once
pub const INSTALL: &str = r#"
if (window.__retrace_recorder) return true;

const STORAGE_KEY = '__retrace_pending';
const OVERLAY_ATTR = 'data-retrace-overlay';

let restored = [];
try {
    restored = JSON.parse(sessionStorage.getItem(STORAGE_KEY) || '[]');
} catch (e) {
    restored = [];
}
window.__retrace_events = Array.isArray(restored) ? restored : [];

const persist = () => {
    try {
        sessionStorage.setItem(STORAGE_KEY, JSON.stringify(window.__retrace_events));
    } catch (e) {}
};

const isOverlay = (el) => el && el.closest && el.closest('[' + OVERLAY_ATTR + ']');

const segment = (el) => {
    const parent = el.parentElement;
    const siblings = parent ? Array.from(parent.children) : [el];
    return {
        tag: el.tagName.toLowerCase(),
        id: el.id || null,
        classes: Array.from(el.classList || []),
        position: siblings.indexOf(el) + 1,
        sameTagSiblings: siblings.filter((s) => s.tagName === el.tagName).length,
    };
};

const snapshot = (el) => {
    const attributes = {};
    for (const attr of Array.from(el.attributes || [])) {
        attributes[attr.name] = attr.value;
    }
    const path = [];
    for (let node = el; node && node.nodeType === 1; node = node.parentElement) {
        path.push(segment(node));
    }
    return {
        tag: el.tagName.toLowerCase(),
        id: el.id || null,
        classes: Array.from(el.classList || []),
        attributes,
        text: (el.textContent || '').trim(),
        path,
    };
};

const scroll = () => ({ x: window.scrollX, y: window.scrollY });

const TEST_ATTRIBUTES = ['data-testid', 'data-cy', 'data-test'];
const LABEL_ATTRIBUTES = ['aria-label', 'role'];
const MAX_CLASS_WINDOW = 3;
const MAX_TEXT_LEN = 50;

const escapeValue = (v) => v.replace(/["\\]/g, (c) => '\\' + c)
    .replace(/[\u0001-\u001f\u007f]/g, (c) => '\\' + c.charCodeAt(0).toString(16) + ' ');
const attrSelector = (name, value) => '[' + name + '="' + escapeValue(value) + '"]';
const classSelector = (tag, list) => tag + list.map((c) => '.' + CSS.escape(c)).join('');

const count = (selector, text) => {
    try {
        const found = Array.from(document.querySelectorAll(selector));
        return text ? found.filter((e) => (e.textContent || '').trim() === text).length : found.length;
    } catch (e) {
        return -1;
    }
};

// First candidate unique in the document as it is now; null leaves the structural path
const locate = (el) => {
    const tag = el.tagName.toLowerCase();
    const candidates = [];
    if (el.id) candidates.push(['id', '#' + CSS.escape(el.id), null]);
    for (const name of TEST_ATTRIBUTES) {
        const v = el.getAttribute(name);
        if (v !== null) candidates.push(['test_attribute', attrSelector(name, v), null]);
    }
    for (const name of LABEL_ATTRIBUTES) {
        const v = el.getAttribute(name);
        if (v !== null) candidates.push(['test_attribute', tag + attrSelector(name, v), null]);
    }
    const name = el.getAttribute('name');
    if (name !== null) candidates.push(['name', tag + attrSelector('name', name), null]);

    const classes = Array.from(el.classList || []).filter(Boolean);
    if (classes.length) {
        candidates.push(['class_list', classSelector(tag, classes), null]);
        for (let size = 1; size <= Math.min(MAX_CLASS_WINDOW, classes.length) && size < classes.length; size++) {
            for (let i = 0; i + size <= classes.length; i++) {
                candidates.push(['class_list', classSelector(tag, classes.slice(i, i + size)), null]);
            }
        }
    }

    const text = (el.textContent || '').trim();
    if (text && Array.from(text).length < MAX_TEXT_LEN) candidates.push(['text', tag, text]);

    for (const [strategy, selector, t] of candidates) {
        if (count(selector, t) === 1) return { selector, text: t, strategy };
    }
    return null;
};

const push = (type, el, extra) => {
    window.__retrace_events.push(Object.assign({
        type,
        target: snapshot(el),
        timestamp: Date.now(),
        url: window.location.href,
        scroll: scroll(),
        selector: locate(el),
    }, extra));
    persist();
};

const highlight = document.createElement('div');
highlight.setAttribute(OVERLAY_ATTR, 'highlight');
highlight.style.cssText = 'position:fixed;pointer-events:none;z-index:2147483647;' +
    'border:2px solid #e5484d;background:rgba(229,72,77,0.08);display:none;';
document.documentElement.appendChild(highlight);

let bypass = false;

const handlers = {
    click: (e) => {
        const el = e.target;
        if (bypass || !el || el.nodeType !== 1 || isOverlay(el)) return;
        e.preventDefault();
        e.stopPropagation();
        e.stopImmediatePropagation();

        const scrollBefore = scroll();
        el.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
        requestAnimationFrame(() => requestAnimationFrame(() => {
            push('click', el, { scrollBefore });
            bypass = true;
            try {
                el.click();
            } finally {
                bypass = false;
            }
        }));
    },
    input: (e) => {
        const el = e.target;
        if (!el || isOverlay(el)) return;
        push('input', el, { value: el.value !== undefined ? String(el.value) : '' });
    },
    change: (e) => {
        const el = e.target;
        if (!el || isOverlay(el)) return;
        const checked = (el.type === 'checkbox' || el.type === 'radio') ? !!el.checked : null;
        push('change', el, { value: el.value !== undefined ? String(el.value) : '', checked });
    },
    keydown: (e) => {
        const el = e.target;
        if (!el || el.nodeType !== 1 || isOverlay(el)) return;
        if (e.key !== 'Enter' && e.key !== 'Tab') return;
        push('keydown', el, { key: e.key });
    },
    mouseover: (e) => {
        const el = e.target;
        if (!el || el.nodeType !== 1 || isOverlay(el)) return;
        const r = el.getBoundingClientRect();
        highlight.style.left = r.left + 'px';
        highlight.style.top = r.top + 'px';
        highlight.style.width = r.width + 'px';
        highlight.style.height = r.height + 'px';
        highlight.style.display = window.__retrace_overlays_hidden ? 'none' : 'block';
    },
    mouseout: () => {
        highlight.style.display = 'none';
    },
};

for (const [type, handler] of Object.entries(handlers)) {
    document.addEventListener(type, handler, true);
}

window.__retrace_recorder = { handlers, highlight };
return true;
"#;

/// Returns and clears the queued events
pub const DRAIN: &str = r#"
const events = window.__retrace_events || [];
window.__retrace_events = [];
try {
    sessionStorage.removeItem('__retrace_pending');
} catch (e) {}
return events;
"#;

/// Detaches listeners and removes the highlight overlay
pub const UNINSTALL: &str = r#"
const recorder = window.__retrace_recorder;
if (!recorder) return false;
for (const [type, handler] of Object.entries(recorder.handlers)) {
    document.removeEventListener(type, handler, true);
}
recorder.highlight.remove();
delete window.__retrace_recorder;
window.__retrace_events = [];
try {
    sessionStorage.removeItem('__retrace_pending');
} catch (e) {}
return true;
"#;

/// Toggles every recorder-owned element; takes one boolean argument
pub const SET_OVERLAYS_HIDDEN: &str = r#"
const hidden = arguments[0];
window.__retrace_overlays_hidden = hidden;
for (const el of document.querySelectorAll('[data-retrace-overlay]')) {
    el.style.visibility = hidden ? 'hidden' : 'visible';
}
return true;
"#;
