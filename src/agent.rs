/*!
 * # Client Interception Agent
 *
 * Generates the script injected into every rewritten HTML document. The
 * script wraps every browser capability that can initiate a navigation or
 * network call so that URLs constructed at runtime are re-encoded through
 * the gateway before they leave the page. A rewrite failure always degrades
 * to passing the original URL through; the agent must never break page
 * functionality over a parsing edge case.
 *
 * The template is a plain `const` with placeholder tokens; the JS braces
 * make `format!` unusable here.
 */

use crate::codec::TargetContext;

const AGENT_TEMPLATE: &str = r#"<script>
const SECRET_PATH = '__SECRET_PATH__';
const GATEWAY_HOST = '__GATEWAY_HOST__';

// What the user is really looking at: strip the gateway prefix off the
// address bar. Before the first gateway navigation settles, fall back to
// the target host this document was served for.
function currentTargetUrl() {
	const currentLoc = window.location.href;
	const gatewayPrefix = window.location.origin + SECRET_PATH + '/';
	if (currentLoc.startsWith(gatewayPrefix)) {
		return decodeURIComponent(currentLoc.substring(gatewayPrefix.length));
	}
	return 'https://__TARGET_HOST__/';
}

function proxyUrl(url) {
	if (!url) return '';
	if (typeof url !== 'string') {
		try { url = String(url); } catch (e) { return ''; }
	}
	// Inline payloads and fragment jumps never leave the page.
	if (url.startsWith('data:') || url.startsWith('blob:') || url.startsWith('javascript:') || url.startsWith('#')) return url;

	// Idempotence: an already-proxied reference stays as it is.
	if (url.includes(SECRET_PATH + '/')) return url;

	try {
		const realBase = currentTargetUrl();
		const resolved = new URL(url, realBase);

		// A reference to the gateway's own assets (e.g. the landing page)
		// must not be proxied onto itself.
		if (resolved.host === GATEWAY_HOST && !resolved.pathname.startsWith(SECRET_PATH)) {
			return url;
		}

		return window.location.origin + SECRET_PATH + '/' + resolved.href;
	} catch (e) {
		console.warn('gateway rewrite failed for:', url, e);
		return url;
	}
}

// Some targets check the referrer for hotlink protection.
try {
	Object.defineProperty(document, 'referrer', {
		get: () => 'https://__TARGET_HOST__/',
		configurable: true
	});
} catch (e) { }

// Server-side injection already placed a <base>; recreate it if the page
// replaced its own head.
if (!document.querySelector('base')) {
	const base = document.createElement('base');
	base.href = '__PROXY_BASE__';
	document.head.prepend(base);
}

// --- form submission ---
document.addEventListener('submit', (e) => {
	const form = e.target;
	const rawAction = form.getAttribute('action');
	if (rawAction) {
		form.action = proxyUrl(rawAction);
	}
}, true);

// Programmatic submission skips the submit event entirely.
const nativeFormSubmit = HTMLFormElement.prototype.submit;
HTMLFormElement.prototype.submit = function () {
	const rawAction = this.getAttribute('action');
	if (rawAction) {
		this.action = proxyUrl(rawAction);
	}
	return nativeFormSubmit.call(this);
};

// --- declarative navigation ---
const nativeAssign = Location.prototype.assign;
const nativeReplace = Location.prototype.replace;
Location.prototype.assign = function (url) { return nativeAssign.call(this, proxyUrl(url)); };
Location.prototype.replace = function (url) { return nativeReplace.call(this, proxyUrl(url)); };

// --- request primitives ---
const nativeXHROpen = XMLHttpRequest.prototype.open;
XMLHttpRequest.prototype.open = function (method, url) {
	return nativeXHROpen.call(this, method, proxyUrl(url));
};

const nativeFetch = window.fetch;
window.fetch = (input, init) => {
	if (typeof input === 'string') { input = proxyUrl(input); }
	else if (input?.url) { try { input = new Request(proxyUrl(String(input.url)), input); } catch (e) { } }
	return nativeFetch(input, init);
};

// --- dynamically created elements ---
const nativeCreateElement = document.createElement;
document.createElement = function (tagName, options) {
	const el = nativeCreateElement.call(this, tagName, options);
	const tag = tagName.toLowerCase();
	if (['a', 'img', 'script', 'link', 'iframe', 'form', 'input', 'video', 'audio', 'source', 'object', 'embed'].includes(tag)) {
		const nativeSetAttribute = el.setAttribute;
		el.setAttribute = function (name, value) {
			if (['href', 'src', 'action', 'data', 'poster'].includes(name)) { value = proxyUrl(value); }
			return nativeSetAttribute.call(this, name, value);
		};

		// Direct property assignment bypasses setAttribute.
		if (tag === 'img' || tag === 'iframe' || tag === 'script') {
			let proto = HTMLElement.prototype;
			if (tag === 'img') proto = HTMLImageElement.prototype;
			if (tag === 'iframe') proto = HTMLIFrameElement.prototype;
			if (tag === 'script') proto = HTMLScriptElement.prototype;

			const descriptor = Object.getOwnPropertyDescriptor(proto, 'src');
			if (descriptor?.configurable) {
				Object.defineProperty(el, 'src', {
					get: descriptor.get,
					set: (value) => { descriptor.set.call(el, proxyUrl(value)); },
					configurable: true
				});
			}
		}
	}
	return el;
};

// --- history stack ---
const nativePushState = history.pushState;
history.pushState = function (state, title, url) {
	if (url) return nativePushState.call(this, state, title, proxyUrl(url));
	return nativePushState.call(this, state, title, url);
};

const nativeReplaceState = history.replaceState;
history.replaceState = function (state, title, url) {
	if (url) return nativeReplaceState.call(this, state, title, proxyUrl(url));
	return nativeReplaceState.call(this, state, title, url);
};

// --- socket upgrades ---
// The rewritten URL points at the gateway over http(s); translate the
// scheme pair so the upgrade still happens.
const nativeWebSocket = WebSocket;
window.WebSocket = function (url, protocols) {
	let proxied = proxyUrl(String(url));
	if (proxied.startsWith('http://')) {
		proxied = proxied.replace('http://', 'ws://');
	} else if (proxied.startsWith('https://')) {
		proxied = proxied.replace('https://', 'wss://');
	}
	return new nativeWebSocket(proxied, protocols);
};

// --- new windows and tabs ---
const nativeWindowOpen = window.open;
window.open = function (url, target, features) {
	if (url) url = proxyUrl(url);
	return nativeWindowOpen.call(this, url, target, features);
};
</script>"#;

/// Render the agent for one response.
pub fn agent_script(ctx: &TargetContext, proxy_base_url: &str) -> String {
    AGENT_TEMPLATE
        .replace("__SECRET_PATH__", &ctx.secret)
        .replace("__GATEWAY_HOST__", &ctx.gateway_host)
        .replace("__TARGET_HOST__", &ctx.target_host())
        .replace("__PROXY_BASE__", proxy_base_url)
}
