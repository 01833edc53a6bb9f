//! Landing document served at the bare secret prefix: a single form whose
//! convenience script percent-encodes the entered address and opens it
//! through the gateway in a new tab.

const LANDING_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
	<meta charset="UTF-8">
	<meta name="viewport" content="width=device-width, initial-scale=1.0">
	<title>Gateway</title>
	<style>
		body, html {
			height: 100%;
			margin: 0;
			font-family: system-ui, sans-serif;
			background: #f4f5f7;
			display: flex;
			align-items: center;
			justify-content: center;
		}
		.card {
			background: #fff;
			border-radius: 8px;
			box-shadow: 0 4px 16px rgba(0, 0, 0, 0.12);
			padding: 2rem;
			width: min(28rem, 90vw);
		}
		.card h1 {
			margin: 0 0 1rem;
			font-size: 1.25rem;
			color: #2c3e50;
		}
		.card input[type=text] {
			width: 100%;
			box-sizing: border-box;
			padding: 0.6rem;
			margin-bottom: 1rem;
			border: 1px solid #ccd0d5;
			border-radius: 4px;
			font-size: 1rem;
		}
		.card button {
			width: 100%;
			padding: 0.6rem;
			border: none;
			border-radius: 4px;
			background: #00695c;
			color: #fff;
			font-size: 1rem;
			cursor: pointer;
		}
		.card button:hover {
			background: #00897b;
		}
	</style>
</head>
<body>
	<div class="card">
		<h1>Browse through the gateway</h1>
		<form id="urlForm" onsubmit="openThroughGateway(event)">
			<input type="text" id="targetUrl" placeholder="https://example.com" required>
			<button type="submit">Go</button>
		</form>
	</div>
	<script>
		function openThroughGateway(event) {
			event.preventDefault();
			const targetUrl = document.getElementById('targetUrl').value.trim();
			const secretPath = '__SECRET_PATH__';
			window.open(window.location.origin + secretPath + '/' + encodeURIComponent(targetUrl), '_blank');
		}
	</script>
</body>
</html>"#;

pub fn landing_page(secret: &str) -> String {
    LANDING_TEMPLATE.replace("__SECRET_PATH__", secret)
}
